//! Shared and array formula groups of one sheet.
//!
//! Groups are keyed by the position of their anchor. Member cells point
//! back at that position rather than owning the group, so dissolving or
//! moving a group never leaves a member pointing at freed storage.

mod array;
mod shared;

pub use array::ArrayFormulaGroup;
pub use shared::SharedFormulaGroup;

use std::collections::BTreeMap;

use biffbook_core::{CellAddress, CellRange};
use biffbook_formula::Axis;

use crate::error::{Error, Result};

/// Handle to a formula group on a sheet, by anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupRef {
    Shared(CellAddress),
    Array(CellAddress),
}

impl GroupRef {
    pub fn anchor(&self) -> CellAddress {
        match self {
            GroupRef::Shared(anchor) | GroupRef::Array(anchor) => *anchor,
        }
    }
}

/// All formula groups of one sheet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaGroups {
    shared: BTreeMap<(u32, u16), SharedFormulaGroup>,
    arrays: BTreeMap<(u32, u16), ArrayFormulaGroup>,
}

impl FormulaGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.arrays.is_empty()
    }

    pub fn shared(&self, anchor: CellAddress) -> Option<&SharedFormulaGroup> {
        self.shared.get(&anchor.position())
    }

    pub fn array(&self, anchor: CellAddress) -> Option<&ArrayFormulaGroup> {
        self.arrays.get(&anchor.position())
    }

    /// Shared groups in anchor order
    pub fn shared_groups(&self) -> impl Iterator<Item = &SharedFormulaGroup> {
        self.shared.values()
    }

    /// Array groups in anchor order
    pub fn array_groups(&self) -> impl Iterator<Item = &ArrayFormulaGroup> {
        self.arrays.values()
    }

    /// Range of the first group that intersects `range`
    pub fn find_overlap(&self, range: &CellRange) -> Option<CellRange> {
        self.shared
            .values()
            .map(SharedFormulaGroup::range)
            .chain(self.arrays.values().map(ArrayFormulaGroup::range))
            .find(|r| r.overlaps(range))
    }

    /// The group whose range contains `cell`
    pub fn group_containing(&self, cell: CellAddress) -> Option<GroupRef> {
        let (row, col) = cell.position();
        self.shared
            .values()
            .find(|g| g.range().contains_position(row, col))
            .map(|g| GroupRef::Shared(g.anchor()))
            .or_else(|| {
                self.arrays
                    .values()
                    .find(|g| g.range().contains_position(row, col))
                    .map(|g| GroupRef::Array(g.anchor()))
            })
    }

    pub(crate) fn shared_mut(&mut self, anchor: CellAddress) -> Option<&mut SharedFormulaGroup> {
        self.shared.get_mut(&anchor.position())
    }

    pub(crate) fn shared_groups_mut(&mut self) -> impl Iterator<Item = &mut SharedFormulaGroup> {
        self.shared.values_mut()
    }

    pub(crate) fn arrays_mut(&mut self) -> impl Iterator<Item = &mut ArrayFormulaGroup> {
        self.arrays.values_mut()
    }

    pub(crate) fn shared_anchors(&self) -> Vec<CellAddress> {
        self.shared.values().map(SharedFormulaGroup::anchor).collect()
    }

    pub(crate) fn insert_shared(&mut self, group: SharedFormulaGroup) {
        self.shared.insert(group.anchor().position(), group);
    }

    pub(crate) fn insert_array(&mut self, group: ArrayFormulaGroup) {
        self.arrays.insert(group.anchor().position(), group);
    }

    pub(crate) fn remove_shared(&mut self, anchor: CellAddress) -> Option<SharedFormulaGroup> {
        self.shared.remove(&anchor.position())
    }

    pub(crate) fn remove_array(&mut self, anchor: CellAddress) -> Option<ArrayFormulaGroup> {
        self.arrays.remove(&anchor.position())
    }

    /// What a row or column move does to each group
    ///
    /// Fails with [`Error::GroupSplit`] before anything changes when a
    /// group lies partly inside the moved block, or partly inside the area
    /// the block lands on.
    pub(crate) fn plan_shift(&self, axis: Axis, first: u32, last: u32, delta: i64) -> Result<ShiftPlan> {
        let mut plan = ShiftPlan::default();
        let all = self
            .shared
            .values()
            .map(|g| (GroupRef::Shared(g.anchor()), g.range()))
            .chain(self.arrays.values().map(|g| (GroupRef::Array(g.anchor()), g.range())));
        for (group, range) in all {
            match group_fate(&range, axis, first, last, delta)? {
                GroupFate::Stays => {}
                GroupFate::Moves => plan.moved.push(group),
                GroupFate::Overwritten => plan.overwritten.push(group),
            }
        }
        Ok(plan)
    }
}

/// Groups affected by a row or column move
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ShiftPlan {
    /// Entirely inside the moved block
    pub moved: Vec<GroupRef>,
    /// Entirely inside the area the block lands on
    pub overwritten: Vec<GroupRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupFate {
    Stays,
    Moves,
    Overwritten,
}

fn span(range: &CellRange, axis: Axis) -> (i64, i64) {
    (axis.get(&range.start) as i64, axis.get(&range.end) as i64)
}

fn group_fate(range: &CellRange, axis: Axis, first: u32, last: u32, delta: i64) -> Result<GroupFate> {
    let (g0, g1) = span(range, axis);
    let (b0, b1) = (first as i64, last as i64);
    let (d0, d1) = (b0 + delta, b1 + delta);

    let inside = |lo: i64, hi: i64| g0 >= lo && g1 <= hi;
    let touches = |lo: i64, hi: i64| g1 >= lo && g0 <= hi;

    if inside(b0, b1) {
        Ok(GroupFate::Moves)
    } else if touches(b0, b1) {
        Err(Error::GroupSplit { range: *range })
    } else if inside(d0, d1) {
        Ok(GroupFate::Overwritten)
    } else if touches(d0, d1) {
        Err(Error::GroupSplit { range: *range })
    } else {
        Ok(GroupFate::Stays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biffbook_formula::TokenExpr;
    use pretty_assertions::assert_eq;

    fn groups() -> FormulaGroups {
        let mut groups = FormulaGroups::new();
        groups.insert_shared(SharedFormulaGroup::new(
            CellRange::parse("B2:B10").unwrap(),
            TokenExpr::default(),
        ));
        groups.insert_array(ArrayFormulaGroup::new(
            CellRange::parse("D20:E21").unwrap(),
            TokenExpr::default(),
        ));
        groups
    }

    #[test]
    fn test_overlap_and_membership() {
        let groups = groups();
        assert_eq!(
            groups.find_overlap(&CellRange::parse("A10:C12").unwrap()),
            Some(CellRange::parse("B2:B10").unwrap())
        );
        assert_eq!(groups.find_overlap(&CellRange::parse("C1:C30").unwrap()), None);
        assert_eq!(
            groups.group_containing(CellAddress::new(20, 4)),
            Some(GroupRef::Array(CellAddress::new(19, 3)))
        );
        assert_eq!(groups.group_containing(CellAddress::new(0, 0)), None);
    }

    #[test]
    fn test_shift_moves_whole_groups() {
        // rows 1..=30 down by 5: both groups move
        let plan = groups().plan_shift(Axis::Rows, 0, 29, 5).unwrap();
        assert_eq!(plan.moved.len(), 2);
        assert!(plan.overwritten.is_empty());

        // rows 11..=30 up by 10 land on rows 1..=20; B2:B10 is overwritten
        let plan = groups().plan_shift(Axis::Rows, 10, 29, -10).unwrap();
        assert_eq!(plan.moved, vec![GroupRef::Array(CellAddress::new(19, 3))]);
        assert_eq!(plan.overwritten, vec![GroupRef::Shared(CellAddress::new(1, 1))]);
    }

    #[test]
    fn test_shift_rejects_split() {
        assert!(matches!(
            groups().plan_shift(Axis::Rows, 5, 30, 1),
            Err(Error::GroupSplit { .. })
        ));
        // landing on part of D20:E21
        assert!(matches!(
            groups().plan_shift(Axis::Columns, 0, 0, 4),
            Err(Error::GroupSplit { .. })
        ));
        // columns right of everything
        assert!(groups().plan_shift(Axis::Columns, 10, 20, 3).unwrap().moved.is_empty());
    }
}
