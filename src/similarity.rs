use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use thiserror::Error;

use crate::affinity::{Weights, WeightsError};
use crate::catalog::{Catalog, CatalogError, Track, TrackId};
use crate::force::force;
use crate::pathtree::PathDistance;

/// Default number of neighbours kept per track.
pub const TOP_K: usize = 20;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Invalid weights: {0}")]
    Weights(#[from] WeightsError),
    #[error("Could not build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: TrackId,
    pub force: f64,
}

pub struct SimilarityResult {
    pub tracks_processed: usize,
    pub pairs_compared: usize,
    /// Strongest attractions per track, strongest first.
    pub neighbors: Vec<(TrackId, Vec<Neighbor>)>,
}

/// Tracks that take part in a sweep: chain heads that are reachable and
/// pass the rating cutoff. Aliases carry the head's features, so comparing
/// them would only duplicate results.
fn sweep_candidates(catalog: &Catalog, weights: &Weights) -> Vec<(TrackId, Track)> {
    catalog
        .snapshot()
        .into_iter()
        .filter(|(_, t)| t.is_canonical() && t.reachable && weights.admits(t))
        .collect()
}

fn pair_force(
    weights: &Weights,
    tree: Option<&dyn PathDistance>,
    a: &Track,
    b: &Track,
) -> f64 {
    let ctx = tree.and_then(|t| t.context(a.path(), b.path()));
    force(weights, a, b, ctx)
}

fn strongest(mut scored: Vec<Neighbor>, top_k: usize) -> Vec<Neighbor> {
    let by_force =
        |a: &Neighbor, b: &Neighbor| b.force.total_cmp(&a.force).then(a.id.cmp(&b.id));
    if top_k == 0 {
        return Vec::new();
    }
    // Partial sort: only the top-K matter
    if scored.len() > top_k {
        scored.select_nth_unstable_by(top_k - 1, by_force);
        scored.truncate(top_k);
    }
    scored.sort_by(by_force);
    scored
}

/// Compute the force between every pair of sweep candidates and keep the
/// `top_k` strongest per track.
///
/// The catalog is frozen into a snapshot first; workers share nothing
/// mutable.
pub fn compute_neighbors(
    catalog: &Catalog,
    weights: &Weights,
    tree: Option<&dyn PathDistance>,
    jobs: usize,
    top_k: usize,
) -> Result<SimilarityResult, SweepError> {
    weights.validate()?;
    let tracks = sweep_candidates(catalog, weights);
    let n = tracks.len();

    if n < 2 {
        return Ok(SimilarityResult {
            tracks_processed: n,
            pairs_compared: 0,
            neighbors: tracks.into_iter().map(|(id, _)| (id, Vec::new())).collect(),
        });
    }

    log::info!("Computing forces between {} tracks", n);

    let pb = ProgressBar::new(n as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} tracks ({eta} remaining)",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

    let neighbors: Vec<(TrackId, Vec<Neighbor>)> = pool.install(|| {
        tracks
            .par_iter()
            .map(|(id, a)| {
                let scored: Vec<Neighbor> = tracks
                    .iter()
                    .filter(|(other, _)| other != id)
                    .map(|(other, b)| Neighbor {
                        id: *other,
                        force: pair_force(weights, tree, a, b),
                    })
                    .collect();
                pb.inc(1);
                (*id, strongest(scored, top_k))
            })
            .collect()
    });

    pb.finish_and_clear();

    Ok(SimilarityResult {
        tracks_processed: n,
        pairs_compared: n * (n - 1),
        neighbors,
    })
}

/// Strongest neighbours of a single track. An alias is answered for its
/// chain head.
pub fn neighbors_of(
    catalog: &Catalog,
    weights: &Weights,
    tree: Option<&dyn PathDistance>,
    id: TrackId,
    top_k: usize,
) -> Result<Vec<Neighbor>, SweepError> {
    weights.validate()?;
    let head = catalog.canonical_of(id)?;
    let subject = catalog.track(head)?.clone();

    let scored: Vec<Neighbor> = sweep_candidates(catalog, weights)
        .par_iter()
        .filter(|(other, _)| *other != head)
        .map(|(other, b)| Neighbor {
            id: *other,
            force: pair_force(weights, tree, &subject, b),
        })
        .collect();

    Ok(strongest(scored, top_k))
}
