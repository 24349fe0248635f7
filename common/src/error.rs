use crate::geom::coord::GridCoord;
use thiserror::Error;

/// Fatal algorithmic failures. Recoverable conditions (illegal endpoints,
/// search exhaustion) are ordinary cost-0 results, not errors.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(
        "path {path} cost overflow at ({},{},{}): {base} + {increment} exceeds u64",
        .cell.x, .cell.y, .cell.z
    )]
    CostOverflow {
        path: usize,
        cell: GridCoord,
        base: u64,
        increment: u64,
    },

    #[error(
        "cell ({},{},{}) exceeds the traversing-shape limit while marking path {path}",
        .cell.x, .cell.y, .cell.z
    )]
    TooManyTraversingShapes { path: usize, cell: GridCoord },

    #[error(
        "path {path} gap-fill radius {radius:.1} exceeds map diagonal {diagonal:.1} \
         between ({},{},{}) and ({},{},{})",
        .from.x, .from.y, .from.z, .to.x, .to.y, .to.z
    )]
    GapRadiusExceeded {
        path: usize,
        radius: f64,
        diagonal: f64,
        from: GridCoord,
        to: GridCoord,
    },
}
