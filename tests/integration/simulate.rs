// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use tempfile::tempdir;

use crate::{get_cmd_output, simulate_into, stefcal};
use stefcal::io::DomainFile;

#[test]
fn test_simulate_writes_domains() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("domains.json");
    simulate_into(
        &file,
        &[
            "-n",
            "4",
            "--num-timesteps",
            "5",
            "--domain-length",
            "2",
            "--num-directions",
            "1",
        ],
    );

    let domains = DomainFile::read(&file).unwrap();
    assert_eq!(domains.dataset_id, "sim");
    assert_eq!(domains.num_time, 5);
    assert_eq!(domains.interferometers.len(), 6);
    assert_eq!(domains.domains.len(), 3);
    assert_eq!(domains.domains[2].time1, 5);
    let last = domains.domain(2).unwrap();
    assert!(last.is_last());
    assert_eq!(last.models.len(), 2);
    let shape = last.data.values().next().and_then(|p| p.shape());
    assert_eq!(shape, Some((1, 4)));
}

#[test]
fn test_simulate_dry_run_writes_nothing() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("domains.json");
    let cmd = stefcal()
        .args(["simulate", "--dry-run", "-o"])
        .arg(&file)
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    assert!(!file.exists());
}

#[test]
fn test_simulate_rejects_one_antenna() {
    let cmd = stefcal().args(["simulate", "-n", "1"]).ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("At least 2 antennas"), "{stderr}");
}
