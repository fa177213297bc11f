//! Depth-first traversal over name-addressed dependency graphs.
//!
//! Nodes are looked up through a `children` callback so the same
//! walks serve execution groups and test definitions. Every walk
//! keeps a visited set: malformed input cannot loop forever.

use std::collections::HashSet;

/// Whether `target` is reachable from any of `roots`, roots
/// included.
pub fn contains<'a, F>(roots: &'a [String], target: &str, children: F) -> bool
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut stack: Vec<&'a str> =
        roots.iter().rev().map(String::as_str).collect();
    let mut visited = HashSet::new();

    while let Some(name) = stack.pop() {
        if name == target {
            return true;
        }
        if !visited.insert(name) {
            continue;
        }
        if let Some(next) = children(name) {
            stack.extend(next.iter().rev().map(String::as_str));
        }
    }
    false
}

/// Nodes reachable from `root` in dependency order: every node comes
/// after all of its children, and appears once. `root` is last.
///
/// Returns the name closing a cycle as the error.
pub fn post_order<'a, F>(
    root: &'a str,
    children: F,
) -> Result<Vec<&'a str>, &'a str>
where
    F: Fn(&str) -> Option<&'a [String]>,
{
    let mut order = Vec::new();
    let mut done: HashSet<&str> = HashSet::new();
    let mut on_path: HashSet<&str> = HashSet::new();
    let mut stack: Vec<(&'a str, bool)> = vec![(root, false)];

    while let Some((name, expanded)) = stack.pop() {
        if expanded {
            on_path.remove(name);
            if done.insert(name) {
                order.push(name);
            }
            continue;
        }
        if done.contains(name) {
            continue;
        }
        if !on_path.insert(name) {
            return Err(name);
        }
        stack.push((name, true));
        if let Some(next) = children(name) {
            for child in next.iter().rev() {
                let child = child.as_str();
                if on_path.contains(child) {
                    return Err(child);
                }
                if !done.contains(child) {
                    stack.push((child, false));
                }
            }
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(k, v)| {
                (k.to_string(), v.iter().map(|s| s.to_string()).collect())
            })
            .collect()
    }

    #[test]
    fn test_contains_searches_transitively() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let roots = g["a"].clone();
        let lookup = |n: &str| g.get(n).map(Vec::as_slice);

        assert!(contains(&roots, "b", lookup));
        assert!(contains(&roots, "c", lookup));
        assert!(!contains(&roots, "a", lookup));
        assert!(!contains(&roots, "z", lookup));
    }

    #[test]
    fn test_contains_terminates_on_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        let roots = g["a"].clone();
        assert!(!contains(&roots, "z", |n| g.get(n).map(Vec::as_slice)));
    }

    #[test]
    fn test_post_order_visits_shared_nodes_once() {
        let g = graph(&[
            ("root", &["left", "right"]),
            ("left", &["base"]),
            ("right", &["base"]),
            ("base", &[]),
        ]);
        let order =
            post_order("root", |n| g.get(n).map(Vec::as_slice)).unwrap();
        assert_eq!(order, ["base", "left", "right", "root"]);
    }

    #[test]
    fn test_post_order_reports_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let err = post_order("a", |n| g.get(n).map(Vec::as_slice))
            .unwrap_err();
        assert_eq!(err, "a");
    }

    #[test]
    fn test_post_order_unknown_children_are_leaves() {
        let g = graph(&[("a", &["ghost"])]);
        let order = post_order("a", |n| g.get(n).map(Vec::as_slice))
            .unwrap();
        assert_eq!(order, ["ghost", "a"]);
    }
}
