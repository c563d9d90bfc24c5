//! Deterministic graph search.
//!
//! Used by the map pathfinder (fields, hex steps) and by the transport router
//! (flags, roads). Every search breaks ties on the node ordering so that two
//! machines running the same lock-step simulation agree on the chosen path.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::hash::Hash;

/// A trait for graphs that can be searched.
///
/// `Node`: The type of node identifiers (e.g., map coordinates, flag serials).
/// `Ctx`: A context object passed to cost calculations (e.g., the game state).
pub trait Graph<Node, Ctx> {
    /// Return the neighbors of a node, in a deterministic order.
    fn neighbors(&self, node: Node, context: &Ctx) -> Vec<Node>;

    /// Calculate the cost to move from `from` to `to`.
    fn cost(&self, from: Node, to: Node, context: &Ctx) -> u32;

    /// Estimated cost from `from` to `target`. Must never overestimate.
    fn heuristic(&self, from: Node, target: Node, context: &Ctx) -> u32;
}

/// Result of a successful search: the visited nodes (start and goal included)
/// and the accumulated cost.
pub type PathResult<Node> = (Vec<Node>, u32);

/// A generic A* pathfinder.
pub struct AStar;

impl AStar {
    /// Find the cheapest path from `start` to `goal`.
    pub fn find_path<Node, Ctx, G>(
        graph: &G,
        start: Node,
        goal: Node,
        context: &Ctx,
    ) -> Option<PathResult<Node>>
    where
        Node: Copy + Eq + Hash + Ord,
        G: Graph<Node, Ctx>,
    {
        Self::find_path_bounded(graph, start, goal, context, None)
    }

    /// Find the cheapest path whose total cost does not exceed `max_cost`.
    ///
    /// Nodes whose optimistic estimate (`g + h`) already exceeds the bound are
    /// never expanded, which keeps searches for nearby goals cheap on large maps.
    pub fn find_path_bounded<Node, Ctx, G>(
        graph: &G,
        start: Node,
        goal: Node,
        context: &Ctx,
        max_cost: Option<u32>,
    ) -> Option<PathResult<Node>>
    where
        Node: Copy + Eq + Hash + Ord,
        G: Graph<Node, Ctx>,
    {
        let mut open_set = BinaryHeap::new();
        let mut came_from: HashMap<Node, Node> = HashMap::new();
        let mut g_score: HashMap<Node, u32> = HashMap::new();
        let mut closed_set: HashSet<Node> = HashSet::new();
        let limit = max_cost.unwrap_or(u32::MAX);

        g_score.insert(start, 0);
        open_set.push(OpenNode {
            node: start,
            cost: 0,
            priority: graph.heuristic(start, goal, context),
        });

        while let Some(OpenNode { node: current, .. }) = open_set.pop() {
            if !closed_set.insert(current) {
                continue;
            }

            if current == goal {
                return Some((reconstruct(&came_from, current), g_score[&goal]));
            }

            let current_g = g_score[&current];

            for neighbor in graph.neighbors(current, context) {
                if closed_set.contains(&neighbor) {
                    continue;
                }

                let tentative_g = current_g.saturating_add(graph.cost(current, neighbor, context));
                if tentative_g > limit {
                    continue;
                }
                let priority = tentative_g.saturating_add(graph.heuristic(neighbor, goal, context));
                if priority > limit {
                    continue;
                }

                if tentative_g < *g_score.get(&neighbor).unwrap_or(&u32::MAX) {
                    came_from.insert(neighbor, current);
                    g_score.insert(neighbor, tentative_g);
                    open_set.push(OpenNode {
                        node: neighbor,
                        cost: tentative_g,
                        priority,
                    });
                }
            }
        }

        None
    }

    /// Dijkstra flood from `start` to the cheapest node accepted by `is_goal`.
    ///
    /// Among equally cheap goals the smallest node wins.
    pub fn find_closest<Node, Ctx, G, F>(
        graph: &G,
        start: Node,
        context: &Ctx,
        max_cost: Option<u32>,
        mut is_goal: F,
    ) -> Option<PathResult<Node>>
    where
        Node: Copy + Eq + Hash + Ord,
        G: Graph<Node, Ctx>,
        F: FnMut(Node) -> bool,
    {
        let mut open_set = BinaryHeap::new();
        let mut came_from: HashMap<Node, Node> = HashMap::new();
        let mut g_score: HashMap<Node, u32> = HashMap::new();
        let mut closed_set: HashSet<Node> = HashSet::new();
        let limit = max_cost.unwrap_or(u32::MAX);

        g_score.insert(start, 0);
        open_set.push(OpenNode {
            node: start,
            cost: 0,
            priority: 0,
        });

        while let Some(OpenNode { node: current, .. }) = open_set.pop() {
            if !closed_set.insert(current) {
                continue;
            }
            if is_goal(current) {
                return Some((reconstruct(&came_from, current), g_score[&current]));
            }
            let current_g = g_score[&current];
            for neighbor in graph.neighbors(current, context) {
                if closed_set.contains(&neighbor) {
                    continue;
                }
                let tentative_g = current_g.saturating_add(graph.cost(current, neighbor, context));
                if tentative_g > limit {
                    continue;
                }
                if tentative_g < *g_score.get(&neighbor).unwrap_or(&u32::MAX) {
                    came_from.insert(neighbor, current);
                    g_score.insert(neighbor, tentative_g);
                    open_set.push(OpenNode {
                        node: neighbor,
                        cost: tentative_g,
                        priority: tentative_g,
                    });
                }
            }
        }

        None
    }

    /// Cost of reaching every node within `max_cost` of `start`.
    pub fn distances<Node, Ctx, G>(
        graph: &G,
        start: Node,
        context: &Ctx,
        max_cost: Option<u32>,
    ) -> BTreeMap<Node, u32>
    where
        Node: Copy + Eq + Hash + Ord,
        G: Graph<Node, Ctx>,
    {
        let mut open_set = BinaryHeap::new();
        let mut g_score: BTreeMap<Node, u32> = BTreeMap::new();
        let mut closed_set: HashSet<Node> = HashSet::new();
        let limit = max_cost.unwrap_or(u32::MAX);

        g_score.insert(start, 0);
        open_set.push(OpenNode {
            node: start,
            cost: 0,
            priority: 0,
        });

        while let Some(OpenNode { node, cost, .. }) = open_set.pop() {
            if !closed_set.insert(node) {
                continue;
            }
            for neighbor in graph.neighbors(node, context) {
                if closed_set.contains(&neighbor) {
                    continue;
                }
                let g = cost.saturating_add(graph.cost(node, neighbor, context));
                if g > limit {
                    continue;
                }
                if g < *g_score.get(&neighbor).unwrap_or(&u32::MAX) {
                    g_score.insert(neighbor, g);
                    open_set.push(OpenNode {
                        node: neighbor,
                        cost: g,
                        priority: g,
                    });
                }
            }
        }

        g_score
    }
}

fn reconstruct<Node: Copy + Eq + Hash>(came_from: &HashMap<Node, Node>, goal: Node) -> Vec<Node> {
    let mut path = vec![goal];
    let mut curr = goal;
    while let Some(&prev) = came_from.get(&curr) {
        path.push(prev);
        curr = prev;
    }
    path.reverse();
    path
}

/// Helper struct for the priority queue.
#[derive(Copy, Clone, Eq, PartialEq)]
struct OpenNode<Node> {
    node: Node,
    cost: u32,     // Actual cost from start (g_score)
    priority: u32, // Estimated total cost (f_score = g + h)
}

// Min-heap on priority; ties prefer the deeper node (higher g), then the
// smaller node so that the expansion order never depends on hash seeds.
impl<Node: Ord> Ord for OpenNode<Node> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.cost.cmp(&other.cost))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl<Node: Ord> PartialOrd for OpenNode<Node> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Simple grid graph for testing
    // 0 1 2
    // 3 4 5
    // 6 7 8
    struct GridGraph;

    impl Graph<u32, ()> for GridGraph {
        fn neighbors(&self, node: u32, _context: &()) -> Vec<u32> {
            let mut n = Vec::new();
            let x = node % 3;
            let y = node / 3;

            if x > 0 {
                n.push(node - 1);
            }
            if x < 2 {
                n.push(node + 1);
            }
            if y > 0 {
                n.push(node - 3);
            }
            if y < 2 {
                n.push(node + 3);
            }
            n
        }

        fn cost(&self, _from: u32, _to: u32, _context: &()) -> u32 {
            1
        }

        fn heuristic(&self, from: u32, target: u32, _context: &()) -> u32 {
            let x1 = (from % 3) as i32;
            let y1 = (from / 3) as i32;
            let x2 = (target % 3) as i32;
            let y2 = (target / 3) as i32;
            ((x1 - x2).abs() + (y1 - y2).abs()) as u32
        }
    }

    #[test]
    fn test_grid_pathfinding() {
        let (path, cost) = AStar::find_path(&GridGraph, 0, 8, &()).unwrap();
        assert_eq!(cost, 4);
        assert_eq!(path.first(), Some(&0));
        assert_eq!(path.last(), Some(&8));
        assert_eq!(path.len(), 5);
    }

    #[test]
    fn test_grid_path_is_stable_across_runs() {
        let first = AStar::find_path(&GridGraph, 0, 8, &()).unwrap();
        for _ in 0..10 {
            assert_eq!(AStar::find_path(&GridGraph, 0, 8, &()).unwrap(), first);
        }
    }

    #[test]
    fn test_bounded_search_rejects_expensive_goal() {
        assert!(AStar::find_path_bounded(&GridGraph, 0, 8, &(), Some(3)).is_none());
        assert!(AStar::find_path_bounded(&GridGraph, 0, 8, &(), Some(4)).is_some());
    }

    struct WeightedGraph; // 0 -> 1 (cost 10), 0 -> 2 (cost 1), 2 -> 1 (cost 1)

    impl Graph<u32, ()> for WeightedGraph {
        fn neighbors(&self, node: u32, _context: &()) -> Vec<u32> {
            match node {
                0 => vec![1, 2],
                2 => vec![1],
                _ => vec![],
            }
        }

        fn cost(&self, from: u32, to: u32, _context: &()) -> u32 {
            match (from, to) {
                (0, 1) => 10,
                _ => 1,
            }
        }

        fn heuristic(&self, _from: u32, _target: u32, _context: &()) -> u32 {
            0
        }
    }

    #[test]
    fn test_weighted_pathfinding() {
        let (path, cost) = AStar::find_path(&WeightedGraph, 0, 1, &()).unwrap();
        assert_eq!(cost, 2);
        assert_eq!(path, vec![0, 2, 1]);
    }

    #[test]
    fn test_find_closest_prefers_cheapest_goal() {
        // Goals 1 (cost 2 via 2) and 2 (cost 1): 2 wins.
        let (path, cost) =
            AStar::find_closest(&WeightedGraph, 0, &(), None, |n| n == 1 || n == 2).unwrap();
        assert_eq!(path, vec![0, 2]);
        assert_eq!(cost, 1);
    }

    #[test]
    fn test_find_closest_without_goal() {
        assert!(AStar::find_closest(&WeightedGraph, 0, &(), None, |n| n == 7).is_none());
    }

    #[test]
    fn test_distances_flood() {
        let d = AStar::distances(&GridGraph, 4, &(), Some(1));
        assert_eq!(d.len(), 5);
        assert_eq!(d[&4], 0);
        assert_eq!(d[&1], 1);
        assert!(!d.contains_key(&0));
    }

    // Diamond shape: 0 -> {1, 2} -> 3
    struct DiamondGraph;

    impl Graph<u32, ()> for DiamondGraph {
        fn neighbors(&self, node: u32, _context: &()) -> Vec<u32> {
            match node {
                0 => vec![2, 1],
                1 => vec![3],
                2 => vec![3],
                _ => vec![],
            }
        }

        fn cost(&self, _from: u32, _to: u32, _context: &()) -> u32 {
            1
        }

        fn heuristic(&self, _from: u32, _target: u32, _context: &()) -> u32 {
            0
        }
    }

    #[test]
    fn test_equal_cost_tie_break_prefers_smaller_node() {
        let (path, cost) = AStar::find_path(&DiamondGraph, 0, 3, &()).unwrap();
        assert_eq!(cost, 2);
        assert_eq!(path, vec![0, 1, 3]);
    }
}
