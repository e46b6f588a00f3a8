use crate::types::{
    CandidateScene, DateRange, GridCell, PipelineError, PipelineResult, SceneCandidateSet,
    SceneRecord, SelectedSceneSet,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Product id marker for secondary (tier-2) acquisitions
pub const SECONDARY_MARKER: &str = "_T2";
/// Product id marker for real-time products
pub const REALTIME_MARKER: &str = "_RT";

/// The Landsat scene catalog, loaded by full scan per query.
///
/// The upstream file is an append-only gzipped CSV; this reader treats it as
/// read-only and never persists derived state back into it.
pub struct Catalog {
    records: Vec<SceneRecord>,
}

impl Catalog {
    /// Read the complete catalog from disk. Files ending in `.gz` are
    /// decompressed on the fly; anything else is read as plain CSV.
    pub fn load<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        log::info!("Loading scene catalog from: {}", path.display());

        let file = File::open(path).map_err(PipelineError::Io)?;
        let records = if path.extension().map(|e| e == "gz").unwrap_or(false) {
            let decoder = flate2::read::GzDecoder::new(file);
            Self::read_records(decoder)?
        } else {
            Self::read_records(file)?
        };

        log::info!("Catalog loaded: {} scene records", records.len());
        Ok(Self { records })
    }

    /// Build a catalog from already-parsed records
    pub fn from_records(records: Vec<SceneRecord>) -> Self {
        Self { records }
    }

    fn read_records<R: std::io::Read>(reader: R) -> PipelineResult<Vec<SceneRecord>> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut records = Vec::new();
        for row in csv_reader.deserialize() {
            let record: SceneRecord = row?;
            records.push(record);
        }
        Ok(records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Match catalog rows against the resolved grid cells.
    ///
    /// Per cell: `(path, row)` equality, exclusion of secondary/real-time
    /// products, optional `(start, end]` date filter. Every retained row is
    /// tagged with the index of its cell in `cells` (order of first
    /// appearance). The concatenated result is sorted ascending by
    /// acquisition date and given a dense zero-based row index.
    ///
    /// An empty match is not an error: callers observe an empty set.
    pub fn match_scenes(
        &self,
        cells: &[GridCell],
        date_range: Option<&DateRange>,
    ) -> SceneCandidateSet {
        let mut scenes: Vec<CandidateScene> = Vec::new();

        for (cell_index, cell) in cells.iter().enumerate() {
            let mut cell_count = 0usize;
            for record in &self.records {
                if record.path != cell.path || record.row != cell.row {
                    continue;
                }
                if record.product_id.contains(SECONDARY_MARKER)
                    || record.product_id.contains(REALTIME_MARKER)
                {
                    continue;
                }
                if let Some(range) = date_range {
                    if !range.contains(record.acquisition_date) {
                        continue;
                    }
                }
                scenes.push(CandidateScene {
                    record: record.clone(),
                    cell_index,
                    row_index: 0,
                });
                cell_count += 1;
            }
            log::debug!(
                "Cell ({}, {}) matched {} scene(s)",
                cell.path,
                cell.row,
                cell_count
            );
        }

        // Stable sort keeps cell order of first appearance on equal dates
        scenes.sort_by_key(|c| c.record.acquisition_date);
        for (i, scene) in scenes.iter_mut().enumerate() {
            scene.row_index = i;
        }

        if scenes.is_empty() {
            log::warn!("No catalog scenes matched {} cell(s)", cells.len());
        } else {
            log::info!("Matched {} candidate scene(s)", scenes.len());
        }

        SceneCandidateSet { scenes }
    }
}

/// Flat staging row for the candidate/selection hand-off files.
///
/// The matcher and the selector run in two separate external interactions;
/// these CSVs carry the candidate state between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StagedScene {
    row_index: usize,
    cell_index: usize,
    product_id: String,
    path: i64,
    row: i64,
    acquisition_date: NaiveDate,
    cloud_cover: f64,
    download_url: String,
}

impl StagedScene {
    fn from_candidate(c: &CandidateScene) -> Self {
        Self {
            row_index: c.row_index,
            cell_index: c.cell_index,
            product_id: c.record.product_id.clone(),
            path: c.record.path,
            row: c.record.row,
            acquisition_date: c.record.acquisition_date,
            cloud_cover: c.record.cloud_cover,
            download_url: c.record.download_url.clone(),
        }
    }

    fn into_candidate(self) -> CandidateScene {
        CandidateScene {
            record: SceneRecord {
                product_id: self.product_id,
                path: self.path,
                row: self.row,
                acquisition_date: self.acquisition_date,
                cloud_cover: self.cloud_cover,
                download_url: self.download_url,
            },
            cell_index: self.cell_index,
            row_index: self.row_index,
        }
    }
}

/// Write the matched candidate set to its staging file
pub fn write_candidates_csv<P: AsRef<Path>>(
    set: &SceneCandidateSet,
    path: P,
) -> PipelineResult<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for candidate in set.iter() {
        writer.serialize(StagedScene::from_candidate(candidate))?;
    }
    writer.flush().map_err(PipelineError::Io)?;
    log::debug!(
        "Staged {} candidate(s) to {}",
        set.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Read a staged candidate set back from disk
pub fn read_candidates_csv<P: AsRef<Path>>(path: P) -> PipelineResult<SceneCandidateSet> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut scenes = Vec::new();
    for row in reader.deserialize() {
        let staged: StagedScene = row?;
        scenes.push(staged.into_candidate());
    }
    Ok(SceneCandidateSet { scenes })
}

/// Write the final selected scene set to its staging file
pub fn write_selection_csv<P: AsRef<Path>>(
    set: &SelectedSceneSet,
    path: P,
) -> PipelineResult<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for scene in set.iter() {
        writer.serialize(StagedScene::from_candidate(scene))?;
    }
    writer.flush().map_err(PipelineError::Io)?;
    log::debug!(
        "Staged {} selected scene(s) to {}",
        set.len(),
        path.as_ref().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GridMode;

    fn record(id: &str, path: i64, row: i64, date: &str, cloud: f64) -> SceneRecord {
        SceneRecord {
            product_id: id.to_string(),
            path,
            row,
            acquisition_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            cloud_cover: cloud,
            download_url: format!("https://landsat.example.com/{}/index.html", id),
        }
    }

    fn cell(path: i64, row: i64) -> GridCell {
        GridCell {
            path,
            row,
            mode: GridMode::Descending,
        }
    }

    #[test]
    fn test_marker_exclusion() {
        let catalog = Catalog::from_records(vec![
            record("LC08_L1TP_196026_T1", 196, 26, "2020-05-01", 10.0),
            record("LC08_L1TP_196026_T2", 196, 26, "2020-05-02", 10.0),
            record("LC08_L1TP_196026_RT", 196, 26, "2020-05-03", 10.0),
        ]);

        let set = catalog.match_scenes(&[cell(196, 26)], None);
        assert_eq!(set.len(), 1);
        assert_eq!(set.scenes[0].record.product_id, "LC08_L1TP_196026_T1");
    }

    #[test]
    fn test_date_window_half_open() {
        let catalog = Catalog::from_records(vec![
            record("on_start", 196, 26, "2020-05-01", 0.0),
            record("inside", 196, 26, "2020-05-10", 0.0),
            record("on_end", 196, 26, "2020-05-31", 0.0),
            record("after", 196, 26, "2020-06-01", 0.0),
        ]);

        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2020, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 5, 31).unwrap(),
        );
        let set = catalog.match_scenes(&[cell(196, 26)], Some(&range));

        let ids: Vec<&str> = set.iter().map(|c| c.record.product_id.as_str()).collect();
        assert_eq!(ids, vec!["inside", "on_end"]);
    }

    #[test]
    fn test_sort_and_dense_indices() {
        let catalog = Catalog::from_records(vec![
            record("b_late", 196, 26, "2020-05-20", 0.0),
            record("a_mid", 197, 26, "2020-05-10", 0.0),
            record("c_early", 196, 26, "2020-05-01", 0.0),
        ]);

        let set = catalog.match_scenes(&[cell(196, 26), cell(197, 26)], None);
        assert_eq!(set.len(), 3);

        let ids: Vec<&str> = set.iter().map(|c| c.record.product_id.as_str()).collect();
        assert_eq!(ids, vec!["c_early", "a_mid", "b_late"]);

        let rows: Vec<usize> = set.iter().map(|c| c.row_index).collect();
        assert_eq!(rows, vec![0, 1, 2]);

        // cell_index follows order of first appearance in the cell sequence
        assert_eq!(set.scenes[0].cell_index, 0);
        assert_eq!(set.scenes[1].cell_index, 1);
        assert_eq!(set.scenes[2].cell_index, 0);
    }

    #[test]
    fn test_empty_match_is_soft() {
        let catalog = Catalog::from_records(vec![record("x", 1, 1, "2020-05-01", 0.0)]);
        let set = catalog.match_scenes(&[cell(196, 26)], None);
        assert!(set.is_empty());
    }

    #[test]
    fn test_gzip_catalog_roundtrip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let csv_text = "\
productId,entityId,acquisitionDate,cloudCover,processingLevel,path,row,download_url
LC08_L1TP_196026_20200501_20200509_01_T1,LC81960262020122LGN00,2020-05-01 10:10:42.117784,12.5,L1TP,196,26,https://landsat.example.com/c1/L8/196/026/LC08_L1TP_196026_20200501_20200509_01_T1/index.html
";
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("scene_list.gz");
        let file = File::create(&gz_path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(csv_text.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let catalog = Catalog::load(&gz_path).unwrap();
        assert_eq!(catalog.len(), 1);

        let set = catalog.match_scenes(&[cell(196, 26)], None);
        assert_eq!(set.len(), 1);
        let scene = &set.scenes[0].record;
        assert_eq!(scene.cloud_cover, 12.5);
        assert_eq!(
            scene.acquisition_date,
            NaiveDate::from_ymd_opt(2020, 5, 1).unwrap()
        );
    }

    #[test]
    fn test_staging_roundtrip() {
        let catalog = Catalog::from_records(vec![
            record("a", 196, 26, "2020-05-01", 1.0),
            record("b", 196, 26, "2020-05-02", 2.0),
        ]);
        let set = catalog.match_scenes(&[cell(196, 26)], None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidates.csv");
        write_candidates_csv(&set, &path).unwrap();

        let restored = read_candidates_csv(&path).unwrap();
        assert_eq!(restored, set);
    }
}
