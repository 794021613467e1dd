use ulid::Ulid;

use crate::model::*;

use super::ConflictRecord;

// ── Availability Index ────────────────────────────────────────────

/// Result of checking one candidate window against a vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub vehicle_id: Ulid,
    pub range: DateRange,
    /// Records that block the window; empty when available.
    pub conflicts: Vec<ConflictRecord>,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        self.conflicts.is_empty()
    }
}

fn rental_record(rental: &Rental) -> ConflictRecord {
    ConflictRecord::Rental {
        id: rental.id,
        range: rental.range,
        status: rental.status,
    }
}

fn blackout_record(window: &UnavailabilityWindow) -> ConflictRecord {
    ConflictRecord::Blackout {
        id: window.id,
        range: window.range,
    }
}

/// Active rentals overlapping `range`, skipping `exclude`.
pub fn find_rental_conflicts(
    vs: &VehicleState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Vec<ConflictRecord> {
    vs.overlapping_rentals(range)
        .filter(|r| r.status.is_active() && Some(r.id) != exclude)
        .map(rental_record)
        .collect()
}

/// Everything that blocks `range`: active rentals (except `exclude`) and blackouts.
pub fn find_conflicts(
    vs: &VehicleState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Vec<ConflictRecord> {
    let mut conflicts = find_rental_conflicts(vs, range, exclude);
    conflicts.extend(vs.overlapping_windows(range).map(blackout_record));
    conflicts
}

/// Conflicts a staged event would introduce. Empty means the write keeps
/// active rentals pairwise disjoint and clear of blackouts.
pub(super) fn exclusion_violation(vs: &VehicleState, event: &Event) -> Vec<ConflictRecord> {
    match event {
        Event::RentalCreated { rental } if rental.status.is_active() => {
            find_conflicts(vs, &rental.range, Some(rental.id))
        }
        Event::RentalUpdated { id, range, .. } => match vs.rental(id) {
            Some(current) if current.status.is_active() => find_conflicts(vs, range, Some(*id)),
            _ => Vec::new(),
        },
        Event::RentalStatusChanged { id, status, .. } if status.is_active() => {
            match vs.rental(id) {
                Some(current) if !current.status.is_active() => {
                    find_conflicts(vs, &current.range, Some(*id))
                }
                _ => Vec::new(),
            }
        }
        Event::WindowAdded { window } => find_rental_conflicts(vs, &window.range, None),
        _ => Vec::new(),
    }
}

/// Busy days inside `query`: active rentals and blackouts, clamped and merged.
pub fn busy_ranges(vs: &VehicleState, query: &DateRange) -> Vec<DateRange> {
    let clamp = |r: &DateRange| DateRange::closed(r.start.max(query.start), r.end.min(query.end));

    let mut busy: Vec<DateRange> = vs
        .overlapping_rentals(query)
        .filter(|r| r.status.is_active())
        .map(|r| clamp(&r.range))
        .chain(vs.overlapping_windows(query).map(|w| clamp(&w.range)))
        .collect();
    busy.sort_by_key(|r| r.start);
    merge_overlapping(&busy)
}

/// Bookable sub-ranges of `query`.
pub fn free_ranges(vs: &VehicleState, query: &DateRange) -> Vec<DateRange> {
    subtract_ranges(&[*query], &busy_ranges(vs, query))
}

/// Merge sorted ranges that overlap or touch (`[1,3]` + `[4,6]` → `[1,6]`).
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && last.end.succ_opt().is_none_or(|next| range.start <= next)
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// Days of `base` not covered by `to_remove`. Both inputs sorted by start;
/// `to_remove` must also be disjoint (see [`merge_overlapping`]).
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for b in base {
        while ri < to_remove.len() && to_remove[ri].end < b.start {
            ri += 1;
        }

        // `None` once the cursor has run past the last representable day.
        let mut cursor = Some(b.start);
        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start <= b.end {
            let Some(current) = cursor else { break };
            let r = &to_remove[j];
            if r.start > current
                && let Some(before) = r.start.pred_opt()
            {
                result.push(DateRange::closed(current, before));
            }
            if r.end >= current {
                cursor = r.end.succ_opt();
            }
            j += 1;
        }

        if let Some(current) = cursor
            && current <= b.end
        {
            result.push(DateRange::closed(current, b.end));
        }
    }
    result
}
