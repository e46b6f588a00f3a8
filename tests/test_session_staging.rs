use anyhow::Result;
use landscan::io::catalog;
use landscan::{GridMode, PipelineConfig, PipelineSession, Point};
use std::path::Path;

fn write_grid(dir: &Path) -> std::path::PathBuf {
    let geojson = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature",
     "properties": {"PATH": 196, "ROW": 26, "MODE": "D"},
     "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]}},
    {"type": "Feature",
     "properties": {"PATH": 197, "ROW": 26, "MODE": "D"},
     "geometry": {"type": "Polygon", "coordinates": [[[0.5, 0.0], [1.5, 0.0], [1.5, 1.0], [0.5, 1.0], [0.5, 0.0]]]}}
  ]
}"#;
    let path = dir.join("grid.geojson");
    std::fs::write(&path, geojson).unwrap();
    path
}

fn write_catalog(dir: &Path) -> std::path::PathBuf {
    let csv_text = "\
productId,entityId,acquisitionDate,cloudCover,processingLevel,path,row,download_url
SCENE_A_T1,E1,2020-05-01 10:00:00.000000,30.0,L1TP,196,26,https://landsat.example.com/a/index.html
SCENE_B_T1,E2,2020-05-09 10:00:00.000000,5.0,L1TP,196,26,https://landsat.example.com/b/index.html
SCENE_C_T1,E3,2020-05-10 10:00:00.000000,12.0,L1TP,197,26,https://landsat.example.com/c/index.html
SCENE_D_T2,E4,2020-05-11 10:00:00.000000,1.0,L1TP,196,26,https://landsat.example.com/d/index.html
";
    let path = dir.join("scene_list.csv");
    std::fs::write(&path, csv_text).unwrap();
    path
}

fn session(dir: &Path) -> Result<PipelineSession> {
    let grid_path = write_grid(dir);
    let catalog_path = write_catalog(dir);

    let mut config = PipelineConfig::new(
        catalog_path,
        dir.join("boundaries.geojson"),
        dir.join("scratch"),
        dir.join("out"),
    );
    config.grid_path = Some(grid_path);
    config.grid_mode = GridMode::Descending;

    Ok(PipelineSession::open(config, "staging-test")?)
}

#[test]
fn test_candidates_staged_and_restorable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = session(dir.path())?;

    // Point in the overlap of both tiles: candidates from both cells,
    // tier-2 product excluded, sorted by date
    let set = session.match_scenes(Point::new(0.5, 0.75), None)?.clone();
    let ids: Vec<&str> = set.iter().map(|c| c.record.product_id.as_str()).collect();
    assert_eq!(ids, vec!["SCENE_A_T1", "SCENE_B_T1", "SCENE_C_T1"]);

    let staged = session.candidates_path();
    assert!(staged.exists());
    let restored = catalog::read_candidates_csv(&staged)?;
    assert_eq!(restored, set);

    Ok(())
}

#[test]
fn test_selection_staged_with_one_scene_per_cell() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = session(dir.path())?;

    session.match_scenes(Point::new(0.5, 0.75), None)?;
    let selected = session.select_scene("SCENE_B_T1")?.clone();

    assert_eq!(selected.len(), 2);
    assert_eq!(selected.scenes[0].record.product_id, "SCENE_B_T1");
    assert_eq!(selected.scenes[1].record.product_id, "SCENE_C_T1");
    assert!(session.selection_path().exists());

    Ok(())
}

#[test]
fn test_least_cloudy_autoselect() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = session(dir.path())?;

    let set = session.match_scenes(Point::new(0.5, 0.25), None)?;
    assert_eq!(set.least_cloudy(), Some("SCENE_B_T1"));

    Ok(())
}
