use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based position; absent when the server leaves ranking to the client
    pub rank: Option<u32>,
    pub user_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub points: i64,
}

/// Order entries by rank. Unranked entries are ranked by points (ties by name)
/// after the ranked ones, and every entry ends up with a rank.
pub fn sort_by_rank(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|a, b| match (a.rank, b.rank) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => b.points.cmp(&a.points).then_with(|| a.name.cmp(&b.name)),
    });

    let mut next = 1;
    for entry in entries.iter_mut() {
        match entry.rank {
            Some(rank) => next = rank + 1,
            None => {
                entry.rank = Some(next);
                next += 1;
            }
        }
    }
}
