use crate::types::{Band, BandFile, PipelineError, PipelineResult, SelectedSceneSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Retrieval parameters for the per-scene listing and band downloads
#[derive(Debug, Clone)]
pub struct FetcherParams {
    /// Bound on every HTTP request; a hung listing must not stall the run
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetcherParams {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            user_agent: "landscan/0.2.0 (Landsat Index Pipeline)".to_string(),
        }
    }
}

/// A scene whose retrieval failed; the rest of the set is unaffected
#[derive(Debug, Clone)]
pub struct SceneFailure {
    pub scene_id: String,
    pub reason: String,
}

/// Result of a retrieval pass: everything that arrived, plus an explicit
/// record of each scene that did not.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub bands: Vec<BandFile>,
    pub failures: Vec<SceneFailure>,
}

/// Downloads band rasters for a selected scene set.
///
/// Each scene's `download_url` names an HTML directory listing; links whose
/// filenames end in a requested band suffix are streamed into the scene's
/// scratch directory. One scene failing never aborts the others, and no
/// retries are attempted here.
pub struct BandFetcher {
    params: FetcherParams,
    client: reqwest::blocking::Client,
}

impl BandFetcher {
    pub fn new(params: FetcherParams) -> PipelineResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(params.timeout)
            .user_agent(params.user_agent.clone())
            .build()
            .map_err(|e| PipelineError::Processing(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { params, client })
    }

    /// Create a fetcher with standard parameters
    pub fn standard() -> PipelineResult<Self> {
        Self::new(FetcherParams::default())
    }

    pub fn params(&self) -> &FetcherParams {
        &self.params
    }

    /// Fetch the requested bands for every scene in the set.
    ///
    /// Scenes are independent: with the `parallel` feature the per-scene
    /// downloads fan out across scenes, while each scene's own band set is
    /// fetched sequentially.
    pub fn fetch_bands(
        &self,
        scene_set: &SelectedSceneSet,
        bands: &[Band],
        scratch_dir: &Path,
    ) -> FetchOutcome {
        log::info!(
            "Fetching {} band(s) for {} scene(s)",
            bands.len(),
            scene_set.len()
        );

        #[cfg(feature = "parallel")]
        let per_scene: Vec<(String, PipelineResult<Vec<BandFile>>)> = scene_set
            .scenes
            .par_iter()
            .map(|scene| {
                let id = scene.record.product_id.clone();
                let result = self.fetch_scene_bands(
                    &id,
                    &scene.record.download_url,
                    bands,
                    scratch_dir,
                );
                (id, result)
            })
            .collect();

        #[cfg(not(feature = "parallel"))]
        let per_scene: Vec<(String, PipelineResult<Vec<BandFile>>)> = scene_set
            .scenes
            .iter()
            .map(|scene| {
                let id = scene.record.product_id.clone();
                let result = self.fetch_scene_bands(
                    &id,
                    &scene.record.download_url,
                    bands,
                    scratch_dir,
                );
                (id, result)
            })
            .collect();

        let mut outcome = FetchOutcome::default();
        for (scene_id, result) in per_scene {
            match result {
                Ok(mut files) => outcome.bands.append(&mut files),
                Err(e) => {
                    log::warn!("Scene {} retrieval failed: {}", scene_id, e);
                    outcome.failures.push(SceneFailure {
                        scene_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Retrieved {} band file(s), {} scene failure(s)",
            outcome.bands.len(),
            outcome.failures.len()
        );
        outcome
    }

    /// Fetch one scene's bands from its directory listing
    fn fetch_scene_bands(
        &self,
        scene_id: &str,
        listing_url: &str,
        bands: &[Band],
        scratch_dir: &Path,
    ) -> PipelineResult<Vec<BandFile>> {
        log::debug!("Fetching listing for {}: {}", scene_id, listing_url);

        let response = self.client.get(listing_url).send().map_err(|e| {
            PipelineError::Fetch {
                scene_id: scene_id.to_string(),
                reason: format!("listing request failed: {}", e),
            }
        })?;

        if !response.status().is_success() {
            return Err(PipelineError::Fetch {
                scene_id: scene_id.to_string(),
                reason: format!("listing returned status {}", response.status()),
            });
        }

        let html = response.text().map_err(|e| PipelineError::Fetch {
            scene_id: scene_id.to_string(),
            reason: format!("listing body unreadable: {}", e),
        })?;

        let links = parse_listing_links(&html);
        log::debug!("Listing for {} holds {} file link(s)", scene_id, links.len());

        let scene_dir = scratch_dir.join(scene_id);
        std::fs::create_dir_all(&scene_dir).map_err(PipelineError::Io)?;

        let mut files = Vec::new();
        for &band in bands {
            let suffix = band.file_suffix();
            let filename = match links.iter().find(|l| l.ends_with(suffix)) {
                Some(f) => f,
                // Missing link: leave it to the index stage to report the
                // absent band for this scene.
                None => {
                    log::warn!("Listing for {} has no {} file", scene_id, suffix);
                    continue;
                }
            };

            let file_url = resolve_file_url(listing_url, filename);
            let local_path = scene_dir.join(filename);
            self.download_to_file(scene_id, &file_url, &local_path)?;

            files.push(BandFile {
                scene_id: scene_id.to_string(),
                band,
                local_path,
            });
        }

        Ok(files)
    }

    /// Stream one band file to disk
    fn download_to_file(
        &self,
        scene_id: &str,
        url: &str,
        local_path: &PathBuf,
    ) -> PipelineResult<()> {
        log::debug!("Downloading {}", url);

        let mut response = self.client.get(url).send().map_err(|e| PipelineError::Fetch {
            scene_id: scene_id.to_string(),
            reason: format!("band request failed: {}", e),
        })?;

        if !response.status().is_success() {
            return Err(PipelineError::Fetch {
                scene_id: scene_id.to_string(),
                reason: format!("band {} returned status {}", url, response.status()),
            });
        }

        let mut file = std::fs::File::create(local_path).map_err(PipelineError::Io)?;
        let written = response
            .copy_to(&mut file)
            .map_err(|e| PipelineError::Fetch {
                scene_id: scene_id.to_string(),
                reason: format!("band stream interrupted: {}", e),
            })?;

        log::debug!("Wrote {} bytes to {}", written, local_path.display());
        Ok(())
    }
}

/// Extract link targets from an HTML directory listing.
///
/// Matches bare `href="filename"` targets; anything with a path separator
/// is a navigation link, not a scene file.
fn parse_listing_links(html: &str) -> Vec<String> {
    let mut links = Vec::new();
    for line in html.lines() {
        let mut rest = line;
        while let Some(start) = rest.find("href=\"") {
            let tail = &rest[start + 6..];
            if let Some(end) = tail.find('"') {
                let target = &tail[..end];
                if !target.is_empty() && !target.contains('/') && !target.starts_with('#') {
                    links.push(target.to_string());
                }
                rest = &tail[end..];
            } else {
                break;
            }
        }
    }
    links
}

/// Substitute a listing filename into the scene's listing URL
fn resolve_file_url(listing_url: &str, filename: &str) -> String {
    let base = listing_url
        .strip_suffix("index.html")
        .unwrap_or(listing_url);
    if base.ends_with('/') {
        format!("{}{}", base, filename)
    } else {
        format!("{}/{}", base, filename)
    }
}
