//! Fractional positions for manual ordering inside a cell.
//!
//! A new position is derived from the neighbours of the drop point, so a move
//! rewrites only the moved item. When repeated inserts at the same spot have
//! halved the gap down to float resolution, the cell is renumbered to whole
//! numbers and the renumbering is returned for the caller to persist.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::models::{Item, ItemId};

/// Gap below which neighbours are considered exhausted.
pub const MIN_GAP: f64 = 1e-9;

/// One item's place in a cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: ItemId,
    pub position: f64,
}

impl Slot {
    pub fn new(id: ItemId, position: f64) -> Self {
        Self { id, position }
    }
}

/// Result of placing an item into a cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub position: f64,
    /// `before_id` was given but is no longer in the cell; the item was appended.
    pub stale_target: bool,
    /// Position rewrites for the other items of the cell, when it had to be renumbered.
    pub renumbered: Vec<Slot>,
}

/// Slots of a cell in ascending position order (ties broken by id), skipping
/// items without a usable position.
pub fn slots_of<'a>(items: impl IntoIterator<Item = &'a Item>, field: &str) -> Vec<Slot> {
    let mut slots: Vec<Slot> = items
        .into_iter()
        .filter_map(|item| item.position(field).map(|p| Slot::new(item.id, p)))
        .collect();
    sort_slots(&mut slots);
    slots
}

fn sort_slots(slots: &mut [Slot]) {
    slots.sort_by(|a, b| a.position.total_cmp(&b.position).then(a.id.cmp(&b.id)));
}

/// Compute the position for `moving` dropped before `before_id` in a cell
/// holding `siblings`. `None` appends at the end.
pub fn allocate<R: Rng + ?Sized>(
    siblings: &[Slot],
    moving: ItemId,
    before_id: Option<ItemId>,
    rng: &mut R,
) -> Allocation {
    let mut cell: Vec<Slot> = siblings.iter().copied().filter(|s| s.id != moving).collect();
    sort_slots(&mut cell);

    let target = before_id.and_then(|id| cell.iter().position(|s| s.id == id));
    let stale_target = before_id.is_some() && target.is_none();

    if cell.is_empty() {
        return Allocation {
            position: seed(rng),
            stale_target,
            renumbered: Vec::new(),
        };
    }

    if let Some(position) = between(&cell, target) {
        return Allocation {
            position,
            stale_target,
            renumbered: Vec::new(),
        };
    }

    let renumbered: Vec<Slot> = cell
        .iter()
        .enumerate()
        .map(|(i, s)| Slot::new(s.id, (i + 1) as f64))
        .collect();
    let position = between(&renumbered, target).unwrap_or((renumbered.len() + 1) as f64);
    tracing::debug!(cell_size = renumbered.len(), "renumbered exhausted cell");

    Allocation {
        position,
        stale_target,
        renumbered,
    }
}

/// Position before the item at index `target`, or after the last item when
/// `target` is `None`. `None` when the neighbours cannot be split.
fn between(cell: &[Slot], target: Option<usize>) -> Option<f64> {
    match target {
        None => {
            let last = cell.last()?.position;
            let p = last + 1.0;
            (p > last && p.is_finite()).then_some(p)
        }
        Some(0) => {
            let first = cell.first()?.position;
            let p = first - 1.0;
            (p < first && p.is_finite()).then_some(p)
        }
        Some(i) => {
            let lo = cell.get(i - 1)?.position;
            let hi = cell.get(i)?.position;
            let mid = lo + (hi - lo) / 2.0;
            (hi - lo >= MIN_GAP && lo < mid && mid < hi).then_some(mid)
        }
    }
}

fn seed<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(0.0..1.0)
}

/// Give every item lacking a finite position a random one in `[0, 1)`.
/// Returns the writes the caller must persist; `items` are updated in place.
pub fn seed_missing_positions<R: Rng + ?Sized>(
    items: &mut [Item],
    field: &str,
    rng: &mut R,
) -> Vec<Slot> {
    let mut writes = Vec::new();
    for item in items.iter_mut() {
        if item.position(field).is_none() {
            let p = seed(rng);
            item.set(field, serde_json::Value::from(p));
            writes.push(Slot::new(item.id, p));
        }
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn cell(positions: &[(ItemId, f64)]) -> Vec<Slot> {
        positions.iter().map(|&(id, p)| Slot::new(id, p)).collect()
    }

    #[test]
    fn test_append_to_empty_cell_seeds_unit_range() {
        let a = allocate(&[], 1, None, &mut rng());
        assert!((0.0..1.0).contains(&a.position));
        assert!(!a.stale_target);
        assert!(a.renumbered.is_empty());
    }

    #[test]
    fn test_second_append_is_strictly_greater() {
        let mut r = rng();
        let first = allocate(&[], 1, None, &mut r);
        let second = allocate(&[Slot::new(1, first.position)], 2, None, &mut r);
        assert!(second.position > first.position);
        assert_eq!(second.position, first.position + 1.0);
    }

    #[test]
    fn test_insert_before_first_goes_below() {
        let c = cell(&[(1, 5.0), (2, 6.0)]);
        let a = allocate(&c, 9, Some(1), &mut rng());
        assert_eq!(a.position, 4.0);
    }

    #[test]
    fn test_insert_before_each_index_lands_between_neighbours() {
        let c = cell(&[(1, 0.25), (2, 1.0), (3, 1.5), (4, 10.0)]);
        for i in 0..c.len() {
            let a = allocate(&c, 99, Some(c[i].id), &mut rng());
            assert!(a.position < c[i].position, "index {}", i);
            if i > 0 {
                assert!(a.position > c[i - 1].position, "index {}", i);
            }
            assert!(a.renumbered.is_empty());
        }
    }

    #[test]
    fn test_midpoint_between_neighbours() {
        let c = cell(&[(1, 1.0), (2, 2.0)]);
        let a = allocate(&c, 3, Some(2), &mut rng());
        assert_eq!(a.position, 1.5);
    }

    #[test]
    fn test_unsorted_siblings_are_ordered_first() {
        let c = cell(&[(2, 2.0), (1, 1.0), (3, 3.0)]);
        let a = allocate(&c, 9, Some(3), &mut rng());
        assert_eq!(a.position, 2.5);
    }

    #[test]
    fn test_moving_item_is_excluded_from_siblings() {
        // Item 2 moves from between 1 and 3 to the end of its own cell.
        let c = cell(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        let a = allocate(&c, 2, None, &mut rng());
        assert_eq!(a.position, 4.0);

        // Moving item 3 before item 2: neighbours are 1 and 2.
        let a = allocate(&c, 3, Some(2), &mut rng());
        assert_eq!(a.position, 1.5);
    }

    #[test]
    fn test_stale_target_appends() {
        let c = cell(&[(1, 1.0), (2, 2.0)]);
        let a = allocate(&c, 5, Some(77), &mut rng());
        assert!(a.stale_target);
        assert_eq!(a.position, 3.0);
    }

    #[test]
    fn test_stale_target_in_empty_cell_seeds() {
        let a = allocate(&[], 5, Some(77), &mut rng());
        assert!(a.stale_target);
        assert!((0.0..1.0).contains(&a.position));
    }

    #[test]
    fn test_repeated_same_spot_inserts_renumber_when_exhausted() {
        let mut r = rng();
        let mut c = cell(&[(1, 0.0), (2, 1.0)]);
        let mut next_id = 100;
        let mut renumbered_once = false;

        // Always insert right before item 2; the gap halves each time.
        for _ in 0..80 {
            let a = allocate(&c, next_id, Some(2), &mut r);
            if !a.renumbered.is_empty() {
                renumbered_once = true;
                for slot in &a.renumbered {
                    let s = c.iter_mut().find(|s| s.id == slot.id).unwrap();
                    s.position = slot.position;
                }
            }
            let idx = c.iter().position(|s| s.id == 2).unwrap();
            let hi = c[idx].position;
            let lo = c
                .iter()
                .filter(|s| s.position < hi)
                .map(|s| s.position)
                .fold(f64::NEG_INFINITY, f64::max);
            assert!(a.position > lo && a.position < hi);
            c.push(Slot::new(next_id, a.position));
            next_id += 1;
        }
        assert!(renumbered_once);

        // Order stays total: no two items share a position.
        let mut positions: Vec<f64> = c.iter().map(|s| s.position).collect();
        positions.sort_by(f64::total_cmp);
        positions.dedup();
        assert_eq!(positions.len(), c.len());
    }

    #[test]
    fn test_renumber_keeps_relative_order() {
        let c = cell(&[(1, 1.0), (2, 1.0 + 1e-12), (3, 5.0)]);
        let a = allocate(&c, 4, Some(2), &mut rng());
        assert_eq!(
            a.renumbered,
            vec![Slot::new(1, 1.0), Slot::new(2, 2.0), Slot::new(3, 3.0)]
        );
        assert_eq!(a.position, 1.5);
    }

    #[test]
    fn test_slots_of_sorts_and_breaks_ties_by_id() {
        let items = vec![
            Item::new(3).with("pos", 1.0),
            Item::new(1).with("pos", 1.0),
            Item::new(2).with("pos", 0.5),
            Item::new(4),
        ];
        let slots = slots_of(&items, "pos");
        let ids: Vec<ItemId> = slots.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_seed_missing_positions_only_touches_missing() {
        let mut items = vec![
            Item::new(1).with("pos", 3.0),
            Item::new(2),
            Item::new(3).with("pos", serde_json::Value::Null),
        ];
        let writes = seed_missing_positions(&mut items, "pos", &mut rng());
        let ids: Vec<ItemId> = writes.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(items[0].position("pos"), Some(3.0));
        for w in &writes {
            assert!((0.0..1.0).contains(&w.position));
        }
        assert!(items.iter().all(|i| i.position("pos").is_some()));
    }
}
