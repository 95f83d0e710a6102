use assert_cmd::cargo::cargo_bin_cmd;
use nbids_lib::io::table::Table;
use serde_json::Value;
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};
use tempfile::{tempdir, TempDir};

const OFFSET_MS: u64 = 500;

struct Project {
    _dir: TempDir,
    root: PathBuf,
    config: PathBuf,
}

impl Project {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let config = root.join("_config.yaml");
        fs::write(
            &config,
            format!(
                "raw_dir: {raw}\nbids_dir: {bids}\nexperiment:\n  task: explore\n  study: explore-plus\n\
                 alignment:\n  trigger_datatype: meg\ndataset:\n  name: Explore Plus\n",
                raw = root.join("raw").display(),
                bids = root.join("bids").display()
            ),
        )
        .unwrap();
        Self {
            _dir: dir,
            root,
            config,
        }
    }

    fn bids(&self) -> PathBuf {
        self.root.join("bids")
    }

    fn run(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        let mut cmd = cargo_bin_cmd!("nbids");
        cmd.arg("--config").arg(&self.config).args(args);
        cmd.assert()
    }
}

/// 80 trials every 4 s; a question every fifth trial.
fn behavior_csv() -> String {
    let mut text = String::from("TrialID,trial_start,RT,outcome_start,startQuestion\n");
    for i in 0..80u64 {
        let start = 1000 + 4000 * i;
        let question = if i % 5 == 4 {
            (start + 2500).to_string()
        } else {
            "nan".into()
        };
        text.push_str(&format!(
            "{},{},{},{},{}\n",
            i + 1,
            start,
            400 + (i % 7) * 10,
            start + 1500,
            question
        ));
    }
    text
}

/// Trigger table matching `behavior_csv`, one calibration pulse per line.
fn trigger_tsv(feedback_pulses: usize) -> String {
    let mut rows = vec![("start".to_string(), OFFSET_MS)];
    for kind in ["cue", "response", "feedback", "questions", "answers"] {
        rows.push((kind.to_string(), 10));
    }
    for i in 0..80u64 {
        let start = 1000 + 4000 * i + OFFSET_MS;
        rows.push(("cue".into(), start));
        rows.push(("response".into(), start + 400 + (i % 7) * 10));
        if (i as usize) < feedback_pulses {
            rows.push(("feedback".into(), start + 1500));
        }
        if i % 5 == 4 {
            rows.push(("questions".into(), start + 2500));
            rows.push(("answers".into(), start + 3300));
        }
    }
    let mut text = String::from("event\tsample\n");
    for (event, sample) in rows {
        text.push_str(&format!("{event}\t{sample}\n"));
    }
    text
}

fn write_raw_behavior(root: &Path) {
    let dir = root.join("raw/sub-108/sess_1/behavior");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("data_subject_108_session_1_block1.000000.csv"),
        behavior_csv(),
    )
    .unwrap();
    fs::write(dir.join("notes.txt"), "not a recording").unwrap();
}

fn meg_dir(project: &Project) -> PathBuf {
    project.bids().join("sub-08/ses-1/meg")
}

#[test]
fn parse_name_prints_json_lines() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("nbids");
    cmd.args([
        "parse-name",
        "--study",
        "explore-plus",
        "RAW/sub-108/sess_4/meg/explore_run2_raw.fif",
        "RAW/misc/readme.txt",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let lines: Vec<Value> = String::from_utf8(output)?
        .lines()
        .map(serde_json::from_str::<Value>)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["result"]["status"], "recognized");
    assert_eq!(lines[0]["result"]["entities"]["subject"], "08");
    assert_eq!(lines[0]["result"]["entities"]["run"], "2");
    assert_eq!(lines[0]["result"]["datatype"], "meg");
    assert_eq!(lines[1]["result"]["status"], "unrecognized");
    Ok(())
}

#[test]
fn behavior_is_bidsified_aligned_and_checked() -> Result<(), Box<dyn Error>> {
    let project = Project::new();
    write_raw_behavior(&project.root);

    project
        .run(&["bidsify", "--subjects", "08", "--dry-run"])
        .success();
    assert!(!project.bids().exists());

    project.run(&["bidsify", "--subjects", "08"]).success();
    let beh = project
        .bids()
        .join("sub-08/ses-1/beh/sub-08_ses-1_task-explore_run-1_beh.tsv");
    assert!(beh.exists());
    assert!(beh.with_extension("json").exists());

    fs::create_dir_all(meg_dir(&project))?;
    fs::write(
        meg_dir(&project).join("sub-08_ses-1_task-explore_run-1_triggers.tsv"),
        trigger_tsv(80),
    )?;
    project.run(&["align-events", "--subjects", "sub-08"]).success();
    let events_path = meg_dir(&project).join("sub-08_ses-1_task-explore_run-1_events.tsv");
    let events = Table::read(&events_path)?;
    assert_eq!(events.len(), 80 * 3 + 16 * 2);
    assert_eq!(&events.headers[..4], ["onset", "duration", "event_id", "trial_type"]);
    assert!(events.column_index("TrialID").is_some());
    assert_eq!(events.rows[0][0], "1.5");
    assert_eq!(events.rows[0][2], "5");

    project
        .run(&["check-events", "--subjects", "08", "--no-plots"])
        .success();
    let filtered = Table::read(&meg_dir(&project).join(
        "sub-08_ses-1_task-explore_run-1_events_filtered.tsv",
    ))?;
    assert_eq!(filtered.len(), events.len());
    let timing = filtered.column_index("timing_diff").unwrap();
    assert!(filtered.rows.iter().all(|r| r[timing] == "0"));
    Ok(())
}

#[test]
fn missing_feedback_is_rebuilt_for_a_single_run() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let behavior = dir.path().join("run_beh.csv");
    fs::write(&behavior, behavior_csv())?;
    let triggers = dir.path().join("run_triggers.tsv");
    fs::write(&triggers, trigger_tsv(60))?;
    let out = dir.path().join("out/run_events.tsv");
    let config = dir.path().join("cfg.toml");
    fs::write(&config, "raw_dir = \"raw\"\nbids_dir = \"bids\"\n")?;

    let mut cmd = cargo_bin_cmd!("nbids");
    cmd.arg("--config").arg(&config).args([
        "align-events",
        "--behavior",
        behavior.to_str().unwrap(),
        "--triggers",
        triggers.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let validation: Value = serde_json::from_slice(&output)?;
    let feedback = validation["statuses"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["kind"] == "feedback")
        .unwrap();
    assert_eq!(feedback["count"], 60);
    assert_eq!(feedback["detected"], false);

    let events = Table::read(&out)?;
    let kind = events.column_index("trial_type").unwrap();
    let feedback_rows = events.rows.iter().filter(|r| r[kind] == "feedback").count();
    assert_eq!(feedback_rows, 80);
    Ok(())
}

#[test]
fn missing_responses_fail_the_run_but_not_the_batch() -> Result<(), Box<dyn Error>> {
    let project = Project::new();
    write_raw_behavior(&project.root);
    project.run(&["bidsify", "--subjects", "sub-08"]).success();
    fs::create_dir_all(meg_dir(&project))?;
    let triggers: String = trigger_tsv(80)
        .lines()
        .filter(|l| !l.starts_with("response"))
        .map(|l| format!("{l}\n"))
        .collect();
    fs::write(
        meg_dir(&project).join("sub-08_ses-1_task-explore_run-1_triggers.tsv"),
        triggers,
    )?;
    let output = project
        .run(&["align-events", "--subjects", "08"])
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output)?;
    assert!(text.contains("Failed:       1"));
    assert!(text.contains("manual review"));
    assert!(!meg_dir(&project)
        .join("sub-08_ses-1_task-explore_run-1_events.tsv")
        .exists());
    Ok(())
}

#[test]
fn batch_commands_need_a_subject_list() {
    let project = Project::new();
    write_raw_behavior(&project.root);
    for command in ["bidsify", "align-events", "check-events", "fix-runs"] {
        project.run(&[command]).failure();
    }
    assert!(!project.bids().exists());
}

#[test]
fn limit_counts_only_the_selected_subjects() -> Result<(), Box<dyn Error>> {
    let project = Project::new();
    let raw = project.root.join("raw");
    for (subject, session) in [("101", "1"), ("101", "2"), ("108", "1"), ("108", "2")] {
        let dir = raw.join(format!("sub-{subject}/sess_{session}/behavior"));
        fs::create_dir_all(&dir)?;
        fs::write(
            dir.join(format!(
                "data_subject_{subject}_session_{session}_block1.000000.csv"
            )),
            behavior_csv(),
        )?;
    }
    project
        .run(&["bidsify", "--subjects", "08", "--limit", "1"])
        .success();
    assert!(!project.bids().join("sub-01").exists());
    assert!(project
        .bids()
        .join("sub-08/ses-1/beh/sub-08_ses-1_task-explore_run-1_beh.tsv")
        .exists());
    assert!(!project.bids().join("sub-08/ses-2").exists());
    Ok(())
}

const EVENTS_TSV: &str = "onset\tduration\tevent_id\tcue_time\tresponse_time\tfeedback_time\n\
                          1.0\t0\t5\t1.0\t1.4\t2.0\n\
                          1.4\t0\t10\t1.0\t1.4\t2.0\n\
                          2.0\t0\t15\t1.0\t1.4\t2.0\n";

#[test]
fn an_unwritable_plot_folder_fails_only_its_run() -> Result<(), Box<dyn Error>> {
    let project = Project::new();
    let mut events = Vec::new();
    for subject in ["01", "02"] {
        let dir = project.bids().join(format!("sub-{subject}/ses-1/meg"));
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("sub-{subject}_ses-1_task-explore_run-1_events.tsv"));
        fs::write(&path, EVENTS_TSV)?;
        events.push(path);
    }
    let plots = project.root.join("plots");
    fs::create_dir_all(&plots)?;
    fs::write(plots.join("sub-01"), "in the way")?;

    let output = project
        .run(&[
            "check-events",
            "--subjects",
            "01",
            "02",
            "--plots-dir",
            plots.to_str().unwrap(),
        ])
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output)?;
    assert!(text.contains("Files seen:   2"));
    assert!(text.contains(&format!("{}: plots:", events[0].display())));
    assert!(events[1]
        .with_file_name("sub-02_ses-1_task-explore_run-1_events_filtered.tsv")
        .exists());
    Ok(())
}
