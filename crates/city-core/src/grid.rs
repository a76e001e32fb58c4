//! Row-major scans over the shared city grid. Pure; callers copy the grid
//! when producing updates.

use contracts::{BuildingKind, CityGrid, Tile, TileCoord};

/// All cells a new building could occupy: empty or rubble.
pub fn open_tiles(grid: &CityGrid) -> Vec<TileCoord> {
    let mut tiles = Vec::new();
    for (row, cells) in grid.0.iter().enumerate() {
        for (col, cell) in cells.iter().enumerate() {
            if matches!(cell, None | Some(Tile::Rubble)) {
                tiles.push([row, col]);
            }
        }
    }
    tiles
}

/// All cells with a standing building, with its kind.
pub fn occupied_tiles(grid: &CityGrid) -> Vec<(usize, usize, BuildingKind)> {
    let mut tiles = Vec::new();
    for (row, cells) in grid.0.iter().enumerate() {
        for (col, cell) in cells.iter().enumerate() {
            if let Some(kind) = cell.and_then(Tile::building) {
                tiles.push((row, col, kind));
            }
        }
    }
    tiles
}
