use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn pcl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pcl");
    path
}

/// Three Westminster postcodes (the second 500 m east of the first), one in
/// Edinburgh, and two rows that must be skipped.
const SAMPLE_CSV: &str = "\
\"SW1A 1AA\",10,529090,179645,\"E92000001\",\"E19000003\",\"\",\"E09000033\",\"E05013806\"
\"SW1A2AA\",10,529590,179645,\"E92000001\",\"E19000003\",\"\",\"E09000033\",\"E05013806\"
\"SW1A 0AA\",10,529090,180145,\"E92000001\",\"E19000003\",\"\",\"E09000033\",\"E05013806\"
\"NOT A CODE\",10,529090,179645,\"\",\"\",\"\",\"\",\"\"
\"EH1 1YZ\",10,325900,673900,\"S92000003\",\"S08000024\",\"\",\"S12000036\",\"S13002929\"
\"W1A 0AX\",10,abc,181400,\"\",\"\",\"\",\"\",\"\"
";

fn write_archive(path: &Path) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("Data/CSV/sw.csv", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(SAMPLE_CSV.as_bytes()).unwrap();
    zip.start_file("Doc/licence.txt", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"Open Government Licence").unwrap();
    zip.finish().unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    write_archive(&root.join("codepo_gb.zip"));

    let config_content = format!(
        r#"[db]
path = "{root}/data/pcl.sqlite"

[ingest]
work_dir = "{root}/data/ingest"
batch_size = 2

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("pcl.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pcl(config_path: &Path, args: &[&str]) -> Output {
    Command::new(pcl_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to run pcl")
}

fn init_and_update(tmp: &TempDir, config_path: &Path) {
    let output = run_pcl(config_path, &["init"]);
    assert!(
        output.status.success(),
        "init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let archive = tmp.path().join("codepo_gb.zip");
    let output = run_pcl(
        config_path,
        &[
            "update",
            "--archive",
            archive.to_str().unwrap(),
            "--progress",
            "off",
        ],
    );
    assert!(
        output.status.success(),
        "update failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("upserted postcodes: 4"), "{stdout}");
    assert!(stdout.contains("skipped rows: 2"), "{stdout}");
    assert!(stdout.contains("ok"));
}

fn json_stdout(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let output = run_pcl(&config_path, &["init"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("initialized"));
    assert!(tmp.path().join("data/pcl.sqlite").exists());

    // Idempotent.
    let output = run_pcl(&config_path, &["init"]);
    assert!(output.status.success());
}

#[test]
fn test_update_then_lookup() {
    let (tmp, config_path) = setup_test_env();
    init_and_update(&tmp, &config_path);

    let view = json_stdout(&run_pcl(&config_path, &["lookup", "sw1a1aa"]));
    assert_eq!(view["postcode"], "SW1A 1AA");
    assert_eq!(view["postcode_trimmed"], "SW1A1AA");
    assert_eq!(view["outcode"], "SW1A");
    assert_eq!(view["incode"], "1AA");
    let lat = view["latitude"].as_f64().unwrap();
    let lon = view["longitude"].as_f64().unwrap();
    assert!((lat - 51.50034).abs() < 1e-4, "{lat}");
    assert!((lon + 0.14159).abs() < 1e-4, "{lon}");

    // Successful runs clean up the work directory.
    assert!(!tmp.path().join("data/ingest/codepo.zip").exists());
}

#[test]
fn test_lookup_unknown_postcode_fails() {
    let (tmp, config_path) = setup_test_env();
    init_and_update(&tmp, &config_path);

    let output = run_pcl(&config_path, &["lookup", "ZZ9 9ZZ"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn test_radius_orders_nearest_first() {
    let (tmp, config_path) = setup_test_env();
    init_and_update(&tmp, &config_path);

    let hits = json_stdout(&run_pcl(&config_path, &["radius", "SW1A 1AA", "1000"]));
    let hits = hits.as_array().unwrap();
    let codes: Vec<&str> = hits
        .iter()
        .map(|h| h["postcode"].as_str().unwrap())
        .collect();
    assert_eq!(codes.len(), 3, "{codes:?}");
    assert_eq!(codes[0], "SW1A 1AA");
    assert_eq!(hits[0]["distance"].as_f64().unwrap(), 0.0);
    assert!(!codes.contains(&"EH1 1YZ"));

    let distances: Vec<f64> = hits
        .iter()
        .map(|h| h["distance"].as_f64().unwrap())
        .collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]), "{distances:?}");

    // Unknown center: empty list, not an error.
    let empty = json_stdout(&run_pcl(&config_path, &["radius", "ZZ9 9ZZ", "1000"]));
    assert_eq!(empty, serde_json::json!([]));
}

#[test]
fn test_radius_rejects_out_of_range() {
    let (_tmp, config_path) = setup_test_env();
    let output = run_pcl(&config_path, &["radius", "SW1A 1AA", "60000"]);
    assert!(!output.status.success());
}

#[test]
fn test_distance_between_postcodes() {
    let (tmp, config_path) = setup_test_env();
    init_and_update(&tmp, &config_path);

    let body = json_stdout(&run_pcl(&config_path, &["distance", "SW1A 1AA", "sw1a2aa"]));
    assert_eq!(body["from"], "SW1A 1AA");
    assert_eq!(body["to"], "SW1A 2AA");
    assert_eq!(body["unit"], "meters");
    let meters = body["distance"].as_f64().unwrap();
    assert!((490.0..510.0).contains(&meters), "{meters}");

    let output = run_pcl(&config_path, &["distance", "SW1A 1AA", "ZZ9 9ZZ"]);
    assert!(!output.status.success());
}

#[test]
fn test_update_is_idempotent_and_recorded() {
    let (tmp, config_path) = setup_test_env();
    init_and_update(&tmp, &config_path);
    let first = json_stdout(&run_pcl(&config_path, &["lookup", "EH1 1YZ"]));

    init_and_update(&tmp, &config_path);
    let second = json_stdout(&run_pcl(&config_path, &["lookup", "EH1 1YZ"]));
    assert_eq!(first, second);

    let output = run_pcl(&config_path, &["stats"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Postcodes:   4"), "{stdout}");
    assert!(stdout.contains("Outcodes:    2"), "{stdout}");
    assert!(stdout.contains("legacy"), "{stdout}");
}

#[test]
fn test_update_with_bad_archive_keeps_data() {
    let (tmp, config_path) = setup_test_env();
    init_and_update(&tmp, &config_path);

    let bad = tmp.path().join("bad.zip");
    fs::write(&bad, b"not a zip").unwrap();
    let output = run_pcl(
        &config_path,
        &["update", "--archive", bad.to_str().unwrap(), "--progress", "off"],
    );
    assert!(!output.status.success());

    let view = json_stdout(&run_pcl(&config_path, &["lookup", "SW1A 1AA"]));
    assert_eq!(view["postcode"], "SW1A 1AA");
    // The failed archive is kept for inspection and the lock is released.
    assert!(tmp.path().join("data/ingest/codepo.zip").exists());
    assert!(!tmp.path().join("data/pcl.lock").exists());
}
