//! Pure role and grouping rules shared by the deployment manager and the
//! queue engine. No I/O here.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentRole {
    Unspecified,
    Fireteam,
    Backup,
}

impl fmt::Display for DeploymentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentRole::Unspecified => write!(f, "Unspecified"),
            DeploymentRole::Fireteam => write!(f, "Fireteam"),
            DeploymentRole::Backup => write!(f, "Backup"),
        }
    }
}

/// Lenient parse for roles coming off stored rows or user selections.
/// Unknown strings map to `Unspecified` rather than failing, so legacy rows
/// keep loading.
pub fn parse_role(raw: &str) -> DeploymentRole {
    // "offense" predates the fireteam rename and still exists on old rows.
    if raw.eq_ignore_ascii_case("offense") {
        return DeploymentRole::Fireteam;
    }
    if raw.eq_ignore_ascii_case("fireteam") {
        return DeploymentRole::Fireteam;
    }
    if raw.eq_ignore_ascii_case("backup") {
        return DeploymentRole::Backup;
    }
    DeploymentRole::Unspecified
}

pub fn roster_full(current: i64, max_roster_size: usize) -> bool {
    current >= max_roster_size as i64
}

#[derive(Debug, Clone, PartialEq)]
pub struct HotDropGroup<T> {
    pub host: T,
    pub players: Vec<T>,
}

/// Assigns waiting players to hosts for one matchmaking round.
///
/// `players` must arrive in queue order. Normal rounds take from the front,
/// keeping assignment fair; strike rounds draw uniformly at random without
/// replacement. A host only gets a group when the group (host included)
/// reaches `min_group_size`; otherwise the host is skipped and no players are
/// consumed for them this round.
pub fn assign_groups<T>(
    hosts: Vec<T>,
    mut players: Vec<T>,
    max_players_per_group: usize,
    min_group_size: usize,
    strike_mode: bool,
    rng: &mut impl Rng,
) -> Vec<HotDropGroup<T>> {
    let mut groups = Vec::new();
    for host in hosts {
        let take = players.len().min(max_players_per_group);
        if 1 + take < min_group_size {
            continue;
        }
        let assigned = if strike_mode {
            let mut picked = Vec::with_capacity(take);
            for _ in 0..take {
                let index = rng.gen_range(0..players.len());
                picked.push(players.remove(index));
            }
            picked
        } else {
            players.drain(..take).collect()
        };
        groups.push(HotDropGroup {
            host,
            players: assigned,
        });
    }
    groups
}
