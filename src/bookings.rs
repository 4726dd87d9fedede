use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a reservation in this state still occupies its resource.
    pub fn holds_resource(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: String,
    pub resource_id: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: ReservationStatus,
}

/// Half-open overlap: `[a.start, a.end)` and `[b.start, b.end)` share an
/// instant. Back-to-back reservations do not overlap.
fn overlaps(a: &Reservation, b: &Reservation) -> bool {
    b.starts_at < a.ends_at && b.ends_at > a.starts_at
}

/// Reservations in `pool` that clash with `target`: same resource,
/// different id, overlapping interval.
pub fn conflicts_for<'p>(target: &Reservation, pool: &'p [Reservation]) -> Vec<&'p Reservation> {
    pool.iter()
        .filter(|b| b.id != target.id && b.resource_id == target.resource_id && overlaps(target, b))
        .collect()
}

/// Every conflicting pair in `pool`, each reported once as `(earlier, later)`
/// by start time. Groups by resource and sweeps in start order instead of
/// comparing all pairs.
pub fn conflict_pairs(pool: &[Reservation]) -> Vec<(&Reservation, &Reservation)> {
    let mut by_resource: HashMap<&str, Vec<&Reservation>> = HashMap::new();
    for r in pool {
        by_resource.entry(r.resource_id.as_str()).or_default().push(r);
    }

    let mut resource_ids = by_resource.keys().copied().collect::<Vec<_>>();
    resource_ids.sort_unstable();

    let mut out = Vec::new();
    for rid in resource_ids {
        let mut list = by_resource.remove(rid).unwrap_or_default();
        list.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then_with(|| a.id.cmp(&b.id)));
        for (i, a) in list.iter().enumerate() {
            for b in &list[i + 1..] {
                if b.starts_at >= a.ends_at {
                    break;
                }
                if a.id != b.id && overlaps(a, b) {
                    out.push((*a, *b));
                }
            }
        }
    }
    out
}
