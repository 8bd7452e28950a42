// Randomized group assignment.
//
// Each attempt reshuffles the whole roster, draws a random tank and healer
// for every group, then fills the damage slots by backtracking over a short,
// shuffled list of the least flexible remaining candidates. The first attempt
// that fills every slot wins; otherwise the best completed attempt does.

use std::fmt;
use std::num::{NonZeroU32, NonZeroUsize};

use chrono::{DateTime, Utc};
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::draft::{Draft, Group, PlayerRef};
use crate::role::Role;
use crate::roster::{RoleCounts, Roster};

/// Slots per group: one tank, one healer, three damage dealers.
pub const GROUP_SIZE: usize = 5;
pub const DPS_PER_GROUP: usize = 3;

pub const DEFAULT_ATTEMPTS: u32 = 200;
pub const DEFAULT_SHORTLIST: usize = 10;

/// Knobs for one solver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverOptions {
    /// Groups the caller would like. Capped by what the roster can support.
    pub desired_groups: Option<usize>,
    /// Maximum number of randomized attempts.
    pub attempts: NonZeroU32,
    /// How many of the least flexible damage candidates are tried per slot.
    pub shortlist: NonZeroUsize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            desired_groups: None,
            attempts: NonZeroU32::new(DEFAULT_ATTEMPTS).unwrap_or(NonZeroU32::MIN),
            shortlist: NonZeroUsize::new(DEFAULT_SHORTLIST).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Why no draft could be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoSolutionReason {
    /// The role counts cannot support a single group.
    NotEnoughPlayers,
    /// Every attempt failed. `leads_assigned` tells whether any attempt at
    /// least managed to seat a tank and a healer in every group.
    BudgetExhausted { leads_assigned: bool },
}

/// A failed run, with the numbers that explain it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoSolution {
    pub reason: NoSolutionReason,
    pub counts: RoleCounts,
    pub target_groups: usize,
    pub attempts: u32,
    /// Everyone, unplaced.
    pub bench: Vec<PlayerRef>,
}

impl fmt::Display for NoSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        match self.reason {
            NoSolutionReason::NotEnoughPlayers => write!(
                f,
                "not enough players for a group (tanks={}, heals={}, dps={}, players={})",
                c.tanks, c.heals, c.dps, c.total
            ),
            NoSolutionReason::BudgetExhausted { leads_assigned } => {
                let cause = if leads_assigned {
                    "not enough damage dealers left after seating tanks and healers"
                } else {
                    "tank and healer signups overlap too much"
                };
                write!(
                    f,
                    "no arrangement for {} group(s) after {} attempts; {} (tanks={}, heals={}, dps={}, players={})",
                    self.target_groups, self.attempts, cause, c.tanks, c.heals, c.dps, c.total
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveOutcome {
    Solved { draft: Draft, attempts_used: u32 },
    NoSolution(NoSolution),
}

impl SolveOutcome {
    pub fn draft(&self) -> Option<&Draft> {
        match self {
            SolveOutcome::Solved { draft, .. } => Some(draft),
            SolveOutcome::NoSolution(_) => None,
        }
    }
}

/// Upper bound on the number of groups a roster can fill.
pub fn max_groups(counts: &RoleCounts) -> usize {
    counts
        .tanks
        .min(counts.heals)
        .min(counts.dps / DPS_PER_GROUP)
        .min(counts.total / GROUP_SIZE)
}

/// Partition `roster` into groups plus a bench.
pub fn solve<R: Rng + ?Sized>(
    roster: &Roster,
    options: &SolverOptions,
    rng: &mut R,
    now: DateTime<Utc>,
) -> SolveOutcome {
    let pool: Vec<PlayerRef> = roster
        .iter()
        .map(|(id, signup)| PlayerRef::snapshot(id, signup))
        .collect();
    let counts = roster.role_counts();
    let ceiling = max_groups(&counts);
    let target = options
        .desired_groups
        .map_or(ceiling, |desired| desired.min(ceiling));

    if target == 0 {
        debug!(?counts, "roster cannot support a group");
        return SolveOutcome::NoSolution(NoSolution {
            reason: NoSolutionReason::NotEnoughPlayers,
            counts,
            target_groups: 0,
            attempts: 0,
            bench: pool,
        });
    }

    let perfect = target * GROUP_SIZE;
    let mut best: Option<(usize, Draft)> = None;
    let mut leads_assigned = false;
    let mut attempts_used = 0;

    for attempt in 1..=options.attempts.get() {
        attempts_used = attempt;

        let mut order: Vec<usize> = (0..pool.len()).collect();
        order.shuffle(rng);
        let mut frame = AttemptFrame::new(&pool, order);

        let Some(leads) = frame.assign_leads(target, rng) else {
            continue;
        };
        leads_assigned = true;

        let Some(dps) = frame.fill_dps(target * DPS_PER_GROUP, options.shortlist.get(), rng)
        else {
            continue;
        };

        let score = frame.placed_count();
        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, frame.into_draft(&leads, &dps, now)));
        }
        if score == perfect {
            break;
        }
    }

    match best {
        Some((score, draft)) => {
            debug!(
                target,
                attempts_used,
                placed = score,
                bench = draft.bench.len(),
                "solver produced a draft"
            );
            SolveOutcome::Solved {
                draft,
                attempts_used,
            }
        }
        None => {
            debug!(target, attempts_used, leads_assigned, "solver budget exhausted");
            SolveOutcome::NoSolution(NoSolution {
                reason: NoSolutionReason::BudgetExhausted { leads_assigned },
                counts,
                target_groups: target,
                attempts: attempts_used,
                bench: pool,
            })
        }
    }
}

/// Search state of a single attempt. Indices point into the roster pool.
struct AttemptFrame<'a> {
    pool: &'a [PlayerRef],
    /// Shuffled pool indices; candidate lists follow this order.
    order: Vec<usize>,
    used: Vec<bool>,
}

impl<'a> AttemptFrame<'a> {
    fn new(pool: &'a [PlayerRef], order: Vec<usize>) -> Self {
        AttemptFrame {
            pool,
            order,
            used: vec![false; pool.len()],
        }
    }

    fn placed_count(&self) -> usize {
        self.used.iter().filter(|u| **u).count()
    }

    fn unused_eligible(&self, role: Role) -> Vec<usize> {
        self.order
            .iter()
            .copied()
            .filter(|&i| !self.used[i] && self.pool[i].is_eligible(role))
            .collect()
    }

    /// Draw a random tank then a random healer for each group, in order.
    /// Returns `(tank, heal)` pool indices per group.
    fn assign_leads<R: Rng + ?Sized>(
        &mut self,
        groups: usize,
        rng: &mut R,
    ) -> Option<Vec<(usize, usize)>> {
        let mut leads = Vec::with_capacity(groups);
        for _ in 0..groups {
            let tank = *self.unused_eligible(Role::Tank).choose(rng)?;
            self.used[tank] = true;
            let heal = *self.unused_eligible(Role::Heal).choose(rng)?;
            self.used[heal] = true;
            leads.push((tank, heal));
        }
        Some(leads)
    }

    /// Candidates for the next damage slot: the `size` least flexible unused
    /// damage dealers, shuffled. Empty when too few remain to cover
    /// `remaining_slots`, which cuts the branch.
    fn dps_shortlist<R: Rng + ?Sized>(
        &self,
        remaining_slots: usize,
        size: usize,
        rng: &mut R,
    ) -> Vec<usize> {
        let mut candidates = self.unused_eligible(Role::Dps);
        if candidates.len() < remaining_slots {
            return Vec::new();
        }
        // stable sort: equally flexible candidates keep the shuffled order
        candidates.sort_by_key(|&i| self.pool[i].roles.len());
        candidates.truncate(size);
        candidates.shuffle(rng);
        candidates
    }

    /// Fill `slots` damage slots left to right by backtracking. Each stack
    /// entry holds the untried candidates for one slot; `chosen[k]` is the
    /// current pick for slot `k`.
    fn fill_dps<R: Rng + ?Sized>(
        &mut self,
        slots: usize,
        shortlist: usize,
        rng: &mut R,
    ) -> Option<Vec<usize>> {
        let mut chosen: Vec<usize> = Vec::with_capacity(slots);
        if slots == 0 {
            return Some(chosen);
        }

        let mut stack: Vec<Vec<usize>> = vec![self.dps_shortlist(slots, shortlist, rng)];
        loop {
            let depth = stack.len();
            if depth == 0 {
                return None;
            }
            // the top slot is about to try another candidate: release its last pick
            if chosen.len() == depth {
                if let Some(prev) = chosen.pop() {
                    self.used[prev] = false;
                }
            }

            match stack.last_mut().and_then(Vec::pop) {
                Some(candidate) => {
                    self.used[candidate] = true;
                    chosen.push(candidate);
                    if chosen.len() == slots {
                        return Some(chosen);
                    }
                    let next = self.dps_shortlist(slots - chosen.len(), shortlist, rng);
                    stack.push(next);
                }
                None => {
                    stack.pop();
                }
            }
        }
    }

    fn into_draft(self, leads: &[(usize, usize)], dps: &[usize], now: DateTime<Utc>) -> Draft {
        let pick = |i: usize| Some(self.pool[i].clone());
        let groups = leads
            .iter()
            .zip(dps.chunks(DPS_PER_GROUP))
            .map(|(&(tank, heal), dps)| Group {
                tank: pick(tank),
                heal: pick(heal),
                dps: [pick(dps[0]), pick(dps[1]), pick(dps[2])],
            })
            .collect();
        let bench = self
            .pool
            .iter()
            .zip(&self.used)
            .filter(|(_, used)| !**used)
            .map(|(p, _)| p.clone())
            .collect();
        Draft::new(groups, bench, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_760_000_000_000).unwrap()
    }

    fn roster_from(entries: &[(&str, &[Role])]) -> Roster {
        let mut roster = Roster::new();
        for (id, roles) in entries {
            // make sure role-less participants still exist on the roster
            roster.toggle_role(id, id, Role::Tank);
            roster.toggle_role(id, id, Role::Tank);
            for role in *roles {
                roster.toggle_role(id, id, *role);
            }
        }
        roster
    }

    /// 2 tank-only, 2 heal-only, 7 dps-only, 1 flexible.
    fn twelve_player_roster() -> Roster {
        let mut entries: Vec<(String, Vec<Role>)> = vec![
            ("t1".into(), vec![Role::Tank]),
            ("t2".into(), vec![Role::Tank]),
            ("h1".into(), vec![Role::Heal]),
            ("h2".into(), vec![Role::Heal]),
            ("flex".into(), vec![Role::Tank, Role::Heal, Role::Dps]),
        ];
        for i in 1..=7 {
            entries.push((format!("d{i}"), vec![Role::Dps]));
        }
        let borrowed: Vec<(&str, &[Role])> = entries
            .iter()
            .map(|(id, roles)| (id.as_str(), roles.as_slice()))
            .collect();
        roster_from(&borrowed)
    }

    fn assert_partition(draft: &Draft, roster: &Roster) {
        let ids = draft.participant_ids();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len(), "duplicate participant in draft");
        let expected: HashSet<&str> = roster.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(unique, expected);
    }

    fn assert_roles_respected(draft: &Draft) {
        for group in &draft.groups {
            for (slot, player) in group.members() {
                let player = player.expect("solver fills every slot");
                assert!(player.is_eligible(slot.role()), "{} in {:?}", player.id, slot);
            }
        }
    }

    #[test]
    fn max_groups_takes_the_tightest_bound() {
        let counts = RoleCounts {
            tanks: 2,
            heals: 2,
            dps: 8,
            total: 12,
        };
        assert_eq!(max_groups(&counts), 2);
        let counts = RoleCounts {
            tanks: 9,
            heals: 9,
            dps: 9,
            total: 9,
        };
        assert_eq!(max_groups(&counts), 1);
    }

    #[test]
    fn twelve_players_make_two_full_groups() {
        let roster = twelve_player_roster();
        let mut rng = StdRng::seed_from_u64(7);
        let outcome = solve(&roster, &SolverOptions::default(), &mut rng, now());
        let SolveOutcome::Solved { draft, .. } = outcome else {
            panic!("expected a draft");
        };
        assert_eq!(draft.groups.len(), 2);
        assert!(draft.groups.iter().all(Group::is_full));
        assert_eq!(draft.bench.len(), 2);
        assert_eq!(draft.created_at, now());
        assert_partition(&draft, &roster);
        assert_roles_respected(&draft);
    }

    #[test]
    fn no_healers_means_no_solution() {
        let roster = roster_from(&[
            ("t1", &[Role::Tank]),
            ("t2", &[Role::Tank, Role::Dps]),
            ("d1", &[Role::Dps]),
            ("d2", &[Role::Dps]),
            ("d3", &[Role::Dps]),
            ("d4", &[Role::Dps]),
        ]);
        let options = SolverOptions {
            attempts: NonZeroU32::new(1000).unwrap(),
            ..SolverOptions::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let SolveOutcome::NoSolution(failure) = solve(&roster, &options, &mut rng, now()) else {
            panic!("expected no solution");
        };
        assert_eq!(failure.reason, NoSolutionReason::NotEnoughPlayers);
        assert_eq!(failure.counts.heals, 0);
        assert_eq!(failure.counts.tanks, 2);
        assert_eq!(failure.bench.len(), 6);
        assert!(failure.to_string().contains("heals=0"));
    }

    #[test]
    fn desired_groups_caps_the_target() {
        let roster = twelve_player_roster();
        let options = SolverOptions {
            desired_groups: Some(1),
            ..SolverOptions::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let outcome = solve(&roster, &options, &mut rng, now());
        let draft = outcome.draft().expect("one group fits");
        assert_eq!(draft.groups.len(), 1);
        assert_eq!(draft.bench.len(), 7);

        let options = SolverOptions {
            desired_groups: Some(5),
            ..SolverOptions::default()
        };
        let outcome = solve(&roster, &options, &mut rng, now());
        assert_eq!(outcome.draft().unwrap().groups.len(), 2);
    }

    #[test]
    fn overlapping_leads_exhaust_the_budget() {
        // The only tank is also the only healer.
        let roster = roster_from(&[
            ("both", &[Role::Tank, Role::Heal]),
            ("d1", &[Role::Dps]),
            ("d2", &[Role::Dps]),
            ("d3", &[Role::Dps]),
            ("idle", &[]),
        ]);
        let options = SolverOptions {
            attempts: NonZeroU32::new(25).unwrap(),
            ..SolverOptions::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let SolveOutcome::NoSolution(failure) = solve(&roster, &options, &mut rng, now()) else {
            panic!("expected no solution");
        };
        assert_eq!(
            failure.reason,
            NoSolutionReason::BudgetExhausted {
                leads_assigned: false
            }
        );
        assert_eq!(failure.attempts, 25);
        assert_eq!(failure.target_groups, 1);
        assert_eq!(failure.bench.len(), 5);
    }

    #[test]
    fn damage_shortfall_after_leads_exhausts_the_budget() {
        let roster = roster_from(&[
            ("td", &[Role::Tank, Role::Dps]),
            ("h", &[Role::Heal]),
            ("d1", &[Role::Dps]),
            ("d2", &[Role::Dps]),
            ("idle", &[]),
        ]);
        let mut rng = StdRng::seed_from_u64(5);
        let SolveOutcome::NoSolution(failure) =
            solve(&roster, &SolverOptions::default(), &mut rng, now())
        else {
            panic!("expected no solution");
        };
        assert_eq!(
            failure.reason,
            NoSolutionReason::BudgetExhausted {
                leads_assigned: true
            }
        );
        assert!(failure.to_string().contains("damage dealers"));
    }

    #[test]
    fn empty_roster_has_no_solution() {
        let mut rng = StdRng::seed_from_u64(0);
        let outcome = solve(&Roster::new(), &SolverOptions::default(), &mut rng, now());
        assert!(matches!(
            outcome,
            SolveOutcome::NoSolution(NoSolution {
                reason: NoSolutionReason::NotEnoughPlayers,
                ..
            })
        ));
    }

    #[test]
    fn same_seed_same_draft() {
        let roster = twelve_player_roster();
        let a = solve(
            &roster,
            &SolverOptions::default(),
            &mut StdRng::seed_from_u64(42),
            now(),
        );
        let b = solve(
            &roster,
            &SolverOptions::default(),
            &mut StdRng::seed_from_u64(42),
            now(),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn least_flexible_damage_dealers_go_first() {
        // Three dps-only players and five who can do anything. With a
        // shortlist of one, the dps slots always go to the specialists.
        let mut entries: Vec<(String, Vec<Role>)> = vec![
            ("t".into(), vec![Role::Tank]),
            ("h".into(), vec![Role::Heal]),
        ];
        for i in 1..=3 {
            entries.push((format!("d{i}"), vec![Role::Dps]));
        }
        for i in 1..=5 {
            entries.push((format!("f{i}"), vec![Role::Tank, Role::Heal, Role::Dps]));
        }
        let borrowed: Vec<(&str, &[Role])> = entries
            .iter()
            .map(|(id, roles)| (id.as_str(), roles.as_slice()))
            .collect();
        let roster = roster_from(&borrowed);
        let options = SolverOptions {
            desired_groups: Some(1),
            shortlist: NonZeroUsize::new(1).unwrap(),
            ..SolverOptions::default()
        };

        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = solve(&roster, &options, &mut rng, now());
            let draft = outcome.draft().expect("one group always fits");
            for player in draft.groups[0].dps.iter().flatten() {
                assert!(player.id.starts_with('d'), "seed {seed}: {} in dps", player.id);
            }
        }
    }

    #[test]
    fn random_rosters_respect_ceiling_and_partition() {
        let all_roles = [Role::Tank, Role::Heal, Role::Dps];
        let mut roster_rng = StdRng::seed_from_u64(2024);
        for round in 0..200u64 {
            let size = roster_rng.random_range(0..30);
            let mut roster = Roster::new();
            for i in 0..size {
                let id = format!("p{i}");
                roster.toggle_role(&id, &id, Role::Dps);
                roster.toggle_role(&id, &id, Role::Dps);
                for role in all_roles {
                    if roster_rng.random_bool(0.45) {
                        roster.toggle_role(&id, &id, role);
                    }
                }
            }

            let counts = roster.role_counts();
            let mut rng = StdRng::seed_from_u64(round);
            match solve(&roster, &SolverOptions::default(), &mut rng, now()) {
                SolveOutcome::Solved { draft, .. } => {
                    assert!(draft.groups.len() <= max_groups(&counts));
                    assert!(draft.groups.len() >= 1);
                    assert_partition(&draft, &roster);
                    assert_roles_respected(&draft);
                    assert_eq!(draft.bench.len(), roster.len() - draft.groups.len() * GROUP_SIZE);
                }
                SolveOutcome::NoSolution(failure) => {
                    assert_eq!(failure.bench.len(), roster.len());
                }
            }
        }
    }
}
