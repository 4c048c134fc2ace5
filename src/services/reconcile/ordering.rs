use uuid::Uuid;

use crate::database::store::{SiblingKind, StoreTx};
use crate::error::Result;

/// One slot of the final sibling sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// A live row that must end up at this index.
    Keep(Uuid),
    /// A row the caller will insert at this index afterwards.
    Insert,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderingPlan {
    /// Phase one: every live sibling parked outside the final range. Empty
    /// when no target index is contended.
    pub temporary: Vec<(Uuid, i32)>,
    /// Phase two: final positions for kept rows.
    pub moves: Vec<(Uuid, i32)>,
}

impl OrderingPlan {
    pub fn needs_shift(&self) -> bool {
        !self.temporary.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.temporary.is_empty() && self.moves.is_empty()
    }
}

/// `live` is every sibling row that will still exist while the sequence is
/// written, with its current position.
pub fn plan_positions(live: &[(Uuid, i32)], sequence: &[Placement]) -> OrderingPlan {
    let contended = sequence.iter().enumerate().any(|(index, placement)| {
        live.iter().any(|(id, position)| {
            *position == index as i32 && *placement != Placement::Keep(*id)
        })
    });

    let final_moves = sequence
        .iter()
        .enumerate()
        .filter_map(|(index, placement)| match placement {
            Placement::Keep(id) => Some((*id, index as i32)),
            Placement::Insert => None,
        });

    if !contended {
        let moves = final_moves
            .filter(|(id, target)| {
                live.iter()
                    .any(|(live_id, position)| live_id == id && position != target)
            })
            .collect();
        return OrderingPlan {
            temporary: Vec::new(),
            moves,
        };
    }

    let floor = live
        .iter()
        .map(|(_, position)| *position)
        .min()
        .unwrap_or(0)
        .min(0);
    let temporary = live
        .iter()
        .enumerate()
        .map(|(offset, (id, _))| (*id, floor - 1 - offset as i32))
        .collect();

    OrderingPlan {
        temporary,
        moves: final_moves.collect(),
    }
}

pub async fn apply(tx: &mut dyn StoreTx, kind: SiblingKind, plan: &OrderingPlan) -> Result<()> {
    if plan.needs_shift() {
        tracing::debug!(?kind, siblings = plan.temporary.len(), "parking siblings before reorder");
    }
    for (id, position) in &plan.temporary {
        tx.set_position(kind, *id, *position).await?;
    }
    for (id, position) in &plan.moves {
        tx.set_position(kind, *id, *position).await?;
    }
    Ok(())
}

/// Plans and applies in one step. Callers insert new rows at the `Insert`
/// indices once this returns.
pub async fn assign(
    tx: &mut dyn StoreTx,
    kind: SiblingKind,
    live: &[(Uuid, i32)],
    sequence: &[Placement],
) -> Result<()> {
    let plan = plan_positions(live, sequence);
    apply(tx, kind, &plan).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn unchanged_order_writes_nothing() {
        let rows = ids(3);
        let live: Vec<(Uuid, i32)> = rows.iter().enumerate().map(|(i, id)| (*id, i as i32)).collect();
        let sequence: Vec<Placement> = rows.iter().map(|id| Placement::Keep(*id)).collect();
        assert!(plan_positions(&live, &sequence).is_empty());
    }

    #[test]
    fn swap_parks_every_sibling_first() {
        let rows = ids(2);
        let live = vec![(rows[0], 0), (rows[1], 1)];
        let sequence = vec![Placement::Keep(rows[1]), Placement::Keep(rows[0])];
        let plan = plan_positions(&live, &sequence);

        assert!(plan.needs_shift());
        assert_eq!(plan.temporary.len(), 2);
        assert_eq!(plan.moves, vec![(rows[1], 0), (rows[0], 1)]);
    }

    #[test]
    fn temporary_range_never_meets_final_or_current_range() {
        let rows = ids(4);
        let live = vec![(rows[0], 0), (rows[1], 1), (rows[2], 2), (rows[3], 7)];
        let sequence = vec![
            Placement::Insert,
            Placement::Keep(rows[2]),
            Placement::Keep(rows[0]),
        ];
        let plan = plan_positions(&live, &sequence);

        let temps: Vec<i32> = plan.temporary.iter().map(|(_, p)| *p).collect();
        assert!(temps.iter().all(|p| *p < 0));
        assert!(temps.iter().all(|p| live.iter().all(|(_, cur)| cur != p)));
        let mut unique = temps.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), temps.len());
    }

    #[test]
    fn insert_into_held_slot_forces_shift() {
        let rows = ids(1);
        let live = vec![(rows[0], 0)];
        let sequence = vec![Placement::Insert, Placement::Keep(rows[0])];
        let plan = plan_positions(&live, &sequence);
        assert!(plan.needs_shift());
        assert_eq!(plan.moves, vec![(rows[0], 1)]);
    }

    #[test]
    fn move_into_free_slot_needs_no_shift() {
        let rows = ids(2);
        let live = vec![(rows[0], 0), (rows[1], 5)];
        let sequence = vec![Placement::Keep(rows[0]), Placement::Keep(rows[1])];
        let plan = plan_positions(&live, &sequence);
        assert!(!plan.needs_shift());
        assert_eq!(plan.moves, vec![(rows[1], 1)]);
    }

    #[test]
    fn parking_goes_below_existing_negative_positions() {
        let rows = ids(2);
        let live = vec![(rows[0], -3), (rows[1], 0)];
        let sequence = vec![Placement::Insert];
        let plan = plan_positions(&live, &sequence);
        assert_eq!(plan.temporary, vec![(rows[0], -4), (rows[1], -5)]);
    }
}
