//! Companion scene selection around a chosen anchor scene.
//!
//! The candidate set is sorted by acquisition date, so distance in row index
//! approximates distance in time. Selection works on that ordering rather
//! than on per-row timestamp deltas; when cells contribute uneven scene
//! counts the two metrics can disagree, which is accepted behavior here.

use crate::types::{PipelineError, PipelineResult, SceneCandidateSet, SelectedSceneSet};

/// Build the final scene set for one user-chosen product: the anchor scene
/// plus, for every other grid cell present in the candidate set, the one
/// candidate closest to the anchor in the date-sorted ordering.
///
/// Ties in distance resolve to the lower row index. Each cell contributes
/// exactly one scene; the anchor's own cell is never duplicated.
pub fn select_companions(
    candidates: &SceneCandidateSet,
    chosen_product_id: &str,
) -> PipelineResult<SelectedSceneSet> {
    let chosen = candidates
        .find(chosen_product_id)
        .ok_or_else(|| PipelineError::NoSuchProduct(chosen_product_id.to_string()))?;

    let anchor_row = chosen.row_index;
    let anchor_cell = chosen.cell_index;

    log::info!(
        "Selecting companions for {} (row {}, cell {})",
        chosen_product_id,
        anchor_row,
        anchor_cell
    );

    // Every row except the anchor, ordered by row distance, ties to the
    // lower original index.
    let mut others: Vec<_> = candidates
        .iter()
        .filter(|c| c.row_index != anchor_row)
        .collect();
    others.sort_by_key(|c| (c.row_index.abs_diff(anchor_row), c.row_index));

    let mut satisfied = vec![anchor_cell];
    let mut scenes = vec![chosen.clone()];

    for candidate in others {
        if satisfied.contains(&candidate.cell_index) {
            continue;
        }
        log::debug!(
            "Cell {} satisfied by {} at row distance {}",
            candidate.cell_index,
            candidate.record.product_id,
            candidate.row_index.abs_diff(anchor_row)
        );
        satisfied.push(candidate.cell_index);
        scenes.push(candidate.clone());
    }

    log::info!(
        "Selected {} scene(s) covering {} cell(s)",
        scenes.len(),
        satisfied.len()
    );

    Ok(SelectedSceneSet { scenes })
}
