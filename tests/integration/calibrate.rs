// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use tempfile::tempdir;

use crate::{get_cmd_output, simulate_into, stefcal};
use stefcal::io::OutputFile;

#[test]
fn test_calibrate_recovers_planted_gains() {
    let dir = tempdir().unwrap();
    let domains = dir.path().join("domains.json");
    let output = dir.path().join("out.json");
    simulate_into(&domains, &[]);

    let cmd = stefcal()
        .args(["calibrate", "--no-progress-bars", "-d"])
        .arg(&domains)
        .arg("-o")
        .arg(&output)
        .args([
            "--no-solve-ifr-gains",
            "--no-apply-ifr-gains",
            "--epsilon",
            "1e-10",
            "--max-iter",
            "3000",
            "--convergence-quota",
            "1",
            "--visualize-gains",
        ])
        .ok();
    assert!(cmd.is_ok(), "calibrate failed: {:?}", get_cmd_output(cmd));

    let results = OutputFile::read(&output).unwrap();
    assert_eq!(results.dataset_id, "sim");
    assert_eq!(results.domains.len(), 2);
    for domain in &results.domains {
        assert!(domain.converged);
        assert!(domain.max_residual < 1e-6, "{}", domain.max_residual);
        assert_eq!(domain.vis.len(), 10);
        assert_eq!(domain.gains["G"].len(), 5);
    }
    // The second domain starts from the first domain's solution.
    assert!(results.domains[1].num_iterations < results.domains[0].num_iterations);
}

#[test]
fn test_calibrate_saves_ifr_gains() {
    let dir = tempdir().unwrap();
    let domains = dir.path().join("domains.json");
    let output = dir.path().join("out.json");
    let table = dir.path().join("ifrgains.json");
    simulate_into(&domains, &["-n", "3"]);

    let cmd = stefcal()
        .args(["calibrate", "--no-progress-bars", "-d"])
        .arg(&domains)
        .arg("-o")
        .arg(&output)
        .arg("--ifr-gain-table")
        .arg(&table)
        .ok();
    assert!(cmd.is_ok(), "calibrate failed: {:?}", get_cmd_output(cmd));
    assert!(output.exists());
    assert!(table.exists());
}

#[test]
fn test_calibrate_with_arg_file() {
    let dir = tempdir().unwrap();
    let domains = dir.path().join("domains.json");
    let output = dir.path().join("out.json");
    let args = dir.path().join("args.toml");
    let saved = dir.path().join("saved.toml");
    simulate_into(&domains, &["--num-directions", "1"]);
    std::fs::write(
        &args,
        format!(
            "domains = {:?}\noutput = {:?}\n\n[calibration]\nno_solve_ifr_gains = true\nno_apply_ifr_gains = true\nmax_major = 2\n",
            domains.display().to_string(),
            output.display().to_string()
        ),
    )
    .unwrap();

    let cmd = stefcal()
        .args(["calibrate", "--no-progress-bars", "--save-toml"])
        .arg(&saved)
        .arg(&args)
        .ok();
    assert!(cmd.is_ok(), "calibrate failed: {:?}", get_cmd_output(cmd));
    let results = OutputFile::read(&output).unwrap();
    for domain in &results.domains {
        assert_eq!(domain.num_major, 3);
    }
    let saved = std::fs::read_to_string(&saved).unwrap();
    assert!(saved.contains("max_major = 2"), "{saved}");
}

#[test]
fn test_calibrate_without_domains_fails() {
    let cmd = stefcal()
        .args(["calibrate", "--no-progress-bars", "--dry-run"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("No domain file"), "{stderr}");
}
