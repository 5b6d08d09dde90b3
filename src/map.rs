//! Store map generation and routing.
//!
//! The map is a cell grid generated from the aisle count: a walled
//! perimeter, aisle corridors with shelf blocks between them, and a goal
//! cell halfway down each aisle. Routing is plain 4-neighbour A* with a
//! Manhattan heuristic.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::Error;

/// Layout constants, in cells.
const AISLE_WIDTH: usize = 4;
const SHELF_WIDTH: usize = 2;
const SHELF_HEIGHT: usize = 10;
const V_MARGIN: usize = 6;

/// Grid coordinate as (row, col).
pub type Cell = (usize, usize);

/// The walkable cells of a single aisle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AislePorts {
    /// Cell at the top entrance of the aisle
    pub top: Cell,
    /// Cell at the bottom entrance of the aisle
    pub bottom: Cell,
    /// Cell halfway down the aisle, where the robot parks
    pub goal: Cell,
}

/// Generated store map: occupancy grid plus per-aisle landmarks.
#[derive(Debug, Clone)]
pub struct StoreMap {
    grid: Vec<Vec<bool>>,
    aisles: HashMap<u32, AislePorts>,
    width: usize,
    height: usize,
}

impl StoreMap {
    /// Generates a map for `num_aisles` aisles laid out over `num_rows`
    /// rows of shelving.
    pub fn generate(num_aisles: u32, num_rows: usize) -> Self {
        let num_rows = num_rows.max(1);
        let aisles_per_row = (num_aisles as usize).div_ceil(num_rows).max(1);

        // Width: wall + aisles + shelves between them + wall
        let width = 1 + aisles_per_row * AISLE_WIDTH + (aisles_per_row - 1) * SHELF_WIDTH + 1;
        // Height: wall + margins + shelf rows + wall
        let height = 2 + num_rows * SHELF_HEIGHT + (num_rows + 1) * V_MARGIN;

        let mut grid = vec![vec![false; width]; height];

        // Perimeter walls
        for row in grid.iter_mut() {
            row[0] = true;
            row[width - 1] = true;
        }
        grid[0].iter_mut().for_each(|c| *c = true);
        grid[height - 1].iter_mut().for_each(|c| *c = true);

        let mut aisles = HashMap::new();
        let mut aisle = 1u32;

        for r_idx in 0..num_rows {
            let row_top = 1 + V_MARGIN + r_idx * (SHELF_HEIGHT + V_MARGIN);
            let row_bot = row_top + SHELF_HEIGHT;

            for c_idx in 0..aisles_per_row {
                if aisle > num_aisles {
                    break;
                }

                let start_x = 1 + c_idx * (AISLE_WIDTH + SHELF_WIDTH);
                let center_x = start_x + AISLE_WIDTH / 2;

                aisles.insert(
                    aisle,
                    AislePorts {
                        top: (row_top, center_x),
                        bottom: (row_bot - 1, center_x),
                        goal: ((row_top + row_bot) / 2, center_x),
                    },
                );

                // Shelf block to the right, unless this is the last aisle
                // of the row
                if c_idx < aisles_per_row - 1 {
                    let shelf_start = start_x + AISLE_WIDTH;
                    for row in grid.iter_mut().take(row_bot).skip(row_top) {
                        for w in 0..SHELF_WIDTH {
                            row[shelf_start + w] = true;
                        }
                    }
                }

                aisle += 1;
            }
        }

        Self {
            grid,
            aisles,
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Whether a cell is a wall or shelf. Out-of-bounds cells count as
    /// blocked.
    pub fn is_blocked(&self, cell: Cell) -> bool {
        let (row, col) = cell;
        row >= self.height || col >= self.width || self.grid[row][col]
    }

    /// Landmarks of an aisle, if it exists on this map.
    pub fn aisle(&self, aisle: u32) -> Option<&AislePorts> {
        self.aisles.get(&aisle)
    }

    /// Clamps an arbitrary cell to the nearest in-bounds coordinate.
    pub fn clamp(&self, cell: Cell) -> Cell {
        (
            cell.0.min(self.height - 1),
            cell.1.min(self.width - 1),
        )
    }

    /// Computes a route from `start` to the goal cell of `aisle`.
    pub fn route_to_aisle(&self, start: Cell, aisle: u32) -> Result<Vec<Cell>, Error> {
        let ports = self.aisle(aisle).ok_or(Error::UnknownAisle(aisle))?;
        astar(&self.grid, start, ports.goal).ok_or(Error::NoRoute(aisle))
    }
}

/// 4-neighbour A* over an occupancy grid. Returns the start-to-goal path
/// including both endpoints, or `None` when the goal is unreachable.
pub fn astar(grid: &[Vec<bool>], start: Cell, goal: Cell) -> Option<Vec<Cell>> {
    let rows = grid.len();
    let cols = grid.first()?.len();
    if start.0 >= rows || start.1 >= cols || grid[start.0][start.1] {
        return None;
    }

    let heuristic =
        |a: Cell, b: Cell| a.0.abs_diff(b.0) + a.1.abs_diff(b.1);

    let mut open_set = BinaryHeap::new();
    open_set.push(Reverse((heuristic(start, goal), start)));
    let mut came_from: HashMap<Cell, Cell> = HashMap::new();
    let mut g_score: HashMap<Cell, usize> = HashMap::from([(start, 0)]);

    while let Some(Reverse((_, current))) = open_set.pop() {
        if current == goal {
            let mut path = vec![current];
            let mut current = current;
            while let Some(&prev) = came_from.get(&current) {
                path.push(prev);
                current = prev;
            }
            path.reverse();
            return Some(path);
        }

        let (row, col) = current;
        let neighbours = [
            (row.wrapping_sub(1), col),
            (row + 1, col),
            (row, col.wrapping_sub(1)),
            (row, col + 1),
        ];
        for neighbour in neighbours {
            let (nr, nc) = neighbour;
            if nr >= rows || nc >= cols || grid[nr][nc] {
                continue;
            }

            let tentative_g = g_score[&current] + 1;
            if g_score.get(&neighbour).is_none_or(|&g| tentative_g < g) {
                came_from.insert(neighbour, current);
                g_score.insert(neighbour, tentative_g);
                let f = tentative_g + heuristic(neighbour, goal);
                open_set.push(Reverse((f, neighbour)));
            }
        }
    }

    None
}
