//! Pathfinding primitives for movement-oriented executions
//!
//! Naval movement (transports, warships) runs A* over water tiles and then
//! consumes the cached path one step per tick. Air movement (missiles,
//! interceptors) needs no search; it steps straight toward the target, which
//! also lets it chase a moving tile cheaply.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::map::{GameMap, TileIdx};

/// A searchable graph over tiles.
pub trait Graph {
    fn neighbors(&self, node: TileIdx) -> Vec<TileIdx>;
    fn cost(&self, from: TileIdx, to: TileIdx) -> u32;
    fn heuristic(&self, from: TileIdx, target: TileIdx) -> u32;
}

/// Generic A* search.
pub struct AStar;

impl AStar {
    pub fn find_path<G: Graph>(graph: &G, start: TileIdx, goal: TileIdx) -> Option<Vec<TileIdx>> {
        let mut open_set = BinaryHeap::new();
        let mut came_from: HashMap<TileIdx, TileIdx> = HashMap::new();
        let mut g_score: HashMap<TileIdx, u32> = HashMap::new();
        let mut closed_set: HashSet<TileIdx> = HashSet::new();

        g_score.insert(start, 0);
        open_set.push(State {
            node: start,
            cost: 0,
            priority: graph.heuristic(start, goal),
        });

        while let Some(State { node: current, .. }) = open_set.pop() {
            if !closed_set.insert(current) {
                continue;
            }

            if current == goal {
                let mut path = vec![current];
                let mut curr = current;
                while let Some(&prev) = came_from.get(&curr) {
                    path.push(prev);
                    curr = prev;
                }
                path.reverse();
                return Some(path);
            }

            let current_g = g_score[&current];

            for neighbor in graph.neighbors(current) {
                if closed_set.contains(&neighbor) {
                    continue;
                }

                let tentative_g = current_g + graph.cost(current, neighbor);
                if tentative_g < *g_score.get(&neighbor).unwrap_or(&u32::MAX) {
                    came_from.insert(neighbor, current);
                    g_score.insert(neighbor, tentative_g);
                    open_set.push(State {
                        node: neighbor,
                        cost: tentative_g,
                        priority: tentative_g + graph.heuristic(neighbor, goal),
                    });
                }
            }
        }

        None
    }
}

/// Min-heap entry. Ordering is flipped so BinaryHeap pops lowest f-score,
/// with g-score as the tie-break to keep expansion order deterministic.
#[derive(Copy, Clone, Eq, PartialEq)]
struct State {
    node: TileIdx,
    cost: u32,
    priority: u32,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.cost.cmp(&self.cost))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Water-only graph. The goal tile is admitted even if it is land so naval
/// paths can terminate on a shore tile.
struct NavalGraph<'a> {
    map: &'a GameMap,
    goal: TileIdx,
}

impl Graph for NavalGraph<'_> {
    fn neighbors(&self, node: TileIdx) -> Vec<TileIdx> {
        self.map
            .neighbors(node)
            .into_iter()
            .filter(|n| self.map.is_water(*n) || *n == self.goal)
            .collect()
    }

    fn cost(&self, _from: TileIdx, _to: TileIdx) -> u32 {
        1
    }

    fn heuristic(&self, from: TileIdx, target: TileIdx) -> u32 {
        self.map.manhattan(from, target)
    }
}

/// Stepwise naval pathing: one tile per call, path cached until the goal
/// changes or the unit leaves the path.
pub struct NavalPathFinder {
    path: Vec<TileIdx>,
    cursor: usize,
    goal: Option<TileIdx>,
}

impl NavalPathFinder {
    pub fn new() -> Self {
        Self {
            path: Vec::new(),
            cursor: 0,
            goal: None,
        }
    }

    /// Next tile toward `goal` from `current`, or None when no route exists
    /// or the unit already sits on the goal.
    pub fn next_step(&mut self, map: &GameMap, current: TileIdx, goal: TileIdx) -> Option<TileIdx> {
        if current == goal {
            return None;
        }

        let on_path = self.goal == Some(goal)
            && self.cursor < self.path.len()
            && self.path.get(self.cursor.wrapping_sub(1)).copied() == Some(current);

        if !on_path {
            let graph = NavalGraph { map, goal };
            self.path = AStar::find_path(&graph, current, goal)?;
            self.goal = Some(goal);
            self.cursor = 1; // path[0] == current
        }

        let next = self.path.get(self.cursor).copied();
        if next.is_some() {
            self.cursor += 1;
        }
        next
    }
}

impl Default for NavalPathFinder {
    fn default() -> Self {
        Self::new()
    }
}

/// Straight-line air stepping toward a (possibly moving) target tile.
pub struct AirPathFinder;

impl AirPathFinder {
    /// One diagonal-allowed step toward the target.
    pub fn next_step(map: &GameMap, current: TileIdx, target: TileIdx) -> TileIdx {
        if current == target {
            return current;
        }
        let (cx, cy) = map.xy(current);
        let (tx, ty) = map.xy(target);
        let nx = step_toward(cx, tx);
        let ny = step_toward(cy, ty);
        map.tile(nx, ny)
    }
}

fn step_toward(from: u32, to: u32) -> u32 {
    match from.cmp(&to) {
        Ordering::Less => from + 1,
        Ordering::Greater => from - 1,
        Ordering::Equal => from,
    }
}
