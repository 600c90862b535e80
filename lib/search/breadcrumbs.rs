use crate::chess::Zobrist;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

const CELLS: usize = 1024;

#[derive(Debug, Default)]
struct Crumb {
    // Owning worker id plus one; zero means free.
    thread: AtomicU64,
    key: AtomicU64,
}

/// A weak registry that lets a worker detect that another worker is
/// currently searching the same position near the root.
///
/// Cells are claimed and released with relaxed ordering; stale or torn
/// entries only ever cost a spurious reduction.
#[derive(Debug)]
pub struct Breadcrumbs([Crumb; CELLS]);

impl Default for Breadcrumbs {
    fn default() -> Self {
        Breadcrumbs(std::array::from_fn(|_| Crumb::default()))
    }
}

impl Breadcrumbs {
    /// Marks a node as being searched by the given worker.
    ///
    /// Only nodes close to the root leave a footprint.
    pub fn visit(&self, thread: usize, key: Zobrist, ply: i32) -> Footprint<'_> {
        if ply >= 8 {
            return Footprint {
                cell: None,
                owning: false,
                marked: false,
            };
        }

        let cell = &self.0[key as usize & (CELLS - 1)];
        let id = thread as u64 + 1;

        let occupant = cell.thread.load(Relaxed);
        if occupant == 0 {
            cell.thread.store(id, Relaxed);
            cell.key.store(key, Relaxed);
            Footprint {
                cell: Some(cell),
                owning: true,
                marked: false,
            }
        } else {
            let marked = occupant != id && cell.key.load(Relaxed) == key;
            Footprint {
                cell: None,
                owning: false,
                marked,
            }
        }
    }
}

/// A scoped claim on a [`Breadcrumbs`] cell.
#[derive(Debug)]
pub struct Footprint<'a> {
    cell: Option<&'a Crumb>,
    owning: bool,
    marked: bool,
}

impl Footprint<'_> {
    /// Whether another worker already marked this position.
    #[inline(always)]
    pub fn marked(&self) -> bool {
        self.marked
    }
}

impl Drop for Footprint<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        if self.owning {
            if let Some(cell) = self.cell {
                cell.thread.store(0, Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_visitor_owns_the_cell() {
        let crumbs = Breadcrumbs::default();
        let footprint = crumbs.visit(0, 42, 0);
        assert!(!footprint.marked());
    }

    #[test]
    fn second_worker_sees_the_mark() {
        let crumbs = Breadcrumbs::default();
        let _own = crumbs.visit(0, 42, 0);
        let other = crumbs.visit(1, 42, 0);
        assert!(other.marked());
    }

    #[test]
    fn same_worker_does_not_mark_itself() {
        let crumbs = Breadcrumbs::default();
        let _own = crumbs.visit(0, 42, 0);
        let again = crumbs.visit(0, 42, 0);
        assert!(!again.marked());
    }

    #[test]
    fn different_key_in_the_same_cell_is_not_marked() {
        let crumbs = Breadcrumbs::default();
        let _own = crumbs.visit(0, 42, 0);
        let other = crumbs.visit(1, 42 + CELLS as u64, 0);
        assert!(other.marked() == false);
    }

    #[test]
    fn cell_is_released_on_drop() {
        let crumbs = Breadcrumbs::default();
        drop(crumbs.visit(0, 42, 0));
        let other = crumbs.visit(1, 42, 0);
        assert!(!other.marked());
    }

    #[test]
    fn deep_nodes_leave_no_footprint() {
        let crumbs = Breadcrumbs::default();
        let _deep = crumbs.visit(0, 42, 8);
        let other = crumbs.visit(1, 42, 0);
        assert!(!other.marked());
    }
}
