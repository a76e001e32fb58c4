//! End-of-day resolution engine.
//!
//! `resolve_day` is the single state transition applied once per period: the
//! group either advances/finishes its active build (everyone completed the
//! goal) or takes an asteroid strike (someone did not). It is pure aside from
//! draws against the injected `Rng` and never mutates its inputs; the caller
//! decides what to do with the returned patch.

use chrono::{DateTime, Utc};
use contracts::{ActiveBuild, BuildingKind, CityGrid, GroupPatch, PendingEvent, Tile};
use rand::Rng;

use crate::grid;

/// Upper bound on tiles destroyed by one asteroid.
pub const DESTROY_MAX_PER_EVENT: usize = 3;

/// Asteroid targeting weight: smaller, cheaper buildings are likelier targets.
pub fn destroy_weight(kind: BuildingKind) -> u32 {
    match kind {
        BuildingKind::House => 3,
        BuildingKind::Apartment => 2,
        BuildingKind::Skyscraper => 1,
    }
}

/// Resolve one period for a group, returning the fields to update.
///
/// The completion set resets every period regardless of outcome, so the patch
/// always carries an empty `completions_today`. With no active build that is
/// the whole patch: streak, grid, and event stay untouched.
pub fn resolve_day<R: Rng>(
    members: &[String],
    completions_today: &[String],
    current_build: Option<&ActiveBuild>,
    city_map: &CityGrid,
    streak: u32,
    now: DateTime<Utc>,
    rng: &mut R,
) -> GroupPatch {
    let mut patch = GroupPatch {
        completions_today: Some(Vec::new()),
        ..GroupPatch::default()
    };

    let Some(build) = current_build else {
        return patch;
    };

    let all_completed = members
        .iter()
        .all(|member| completions_today.iter().any(|done| done == member));

    if all_completed {
        let new_days = build.days_completed + 1;
        if new_days < build.days_required {
            patch.current_build = Some(Some(ActiveBuild {
                days_completed: new_days,
                ..*build
            }));
            patch.streak = Some(streak + 1);
        } else {
            // Build finishes: place it on a random open tile. With no open
            // tile the building is silently discarded.
            let open = grid::open_tiles(city_map);
            if !open.is_empty() {
                let tile = open[rng.gen_range(0..open.len())];
                let mut new_map = *city_map;
                new_map.0[tile[0]][tile[1]] = Some(build.kind.tile());
                patch.city_map = Some(new_map);
                patch.pending_event = Some(PendingEvent::BuildComplete {
                    event_id: next_event_id(rng),
                    building: build.kind,
                    tile,
                    timestamp: now.to_rfc3339(),
                });
            }
            patch.current_build = Some(None);
            patch.streak = Some(0);
        }
    } else {
        patch.current_build = Some(None);
        patch.streak = Some(0);

        let occupied = grid::occupied_tiles(city_map);
        // A lone building is never destroyed; at least one must survive.
        if occupied.len() > 1 {
            let max_destroy = DESTROY_MAX_PER_EVENT.min(occupied.len() - 1);
            let n_destroy = rng.gen_range(1..=max_destroy).min(occupied.len() - 1);

            let weights: Vec<u32> = occupied
                .iter()
                .map(|&(_, _, kind)| destroy_weight(kind))
                .collect();
            let chosen = weighted_sample_without_replacement(&weights, n_destroy, rng);

            let mut new_map = *city_map;
            let mut tiles_destroyed = Vec::with_capacity(chosen.len());
            for index in chosen {
                let (row, col, _) = occupied[index];
                new_map.0[row][col] = Some(Tile::Rubble);
                tiles_destroyed.push([row, col]);
            }

            patch.city_map = Some(new_map);
            patch.pending_event = Some(PendingEvent::Asteroid {
                event_id: next_event_id(rng),
                tiles_destroyed,
                timestamp: now.to_rfc3339(),
            });
        }
    }

    patch
}

/// Draw up to `n` distinct indices into `weights`, proportionally to weight,
/// removing each pick before the next draw so the remaining distribution is
/// renormalized at every step.
pub fn weighted_sample_without_replacement<R: Rng>(
    weights: &[u32],
    n: usize,
    rng: &mut R,
) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..weights.len()).collect();
    let mut chosen = Vec::with_capacity(n.min(remaining.len()));

    while chosen.len() < n && !remaining.is_empty() {
        let total: u64 = remaining.iter().map(|&i| u64::from(weights[i])).sum();
        let position = if total == 0 {
            0
        } else {
            let mut roll = rng.gen_range(0..total);
            let mut position = remaining.len() - 1;
            for (candidate, &index) in remaining.iter().enumerate() {
                let weight = u64::from(weights[index]);
                if roll < weight {
                    position = candidate;
                    break;
                }
                roll -= weight;
            }
            position
        };
        chosen.push(remaining.swap_remove(position));
    }

    chosen
}

/// A fresh `evt_`-prefixed id drawn from the injected rng, so replaying a
/// seeded resolution reproduces ids too.
pub fn next_event_id<R: Rng>(rng: &mut R) -> String {
    format!("evt_{:012x}", rng.gen::<u64>() & 0xffff_ffff_ffff)
}
