use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use nbids_lib::{
    audit::{audit_behavior, file_type_stats, session_summary, validate_bids},
    config::DEFAULT_CONFIG_FILE,
    dataset::{
        collect_participants, participants_from_bids, write_dataset_description,
        write_participants_tsv, WriteOutcome,
    },
    events::{align_files, check_timing, plot_dir, write_filtered, CheckedEvents, EventKind},
    io::{
        filter_subjects, glob_files,
        table::Table,
        triggers::{events_path_for, locate_triggers},
        walk_files,
    },
    materialize::{
        find_sidecars, materialize, patch_channel_types, rename_with_sidecars,
        MaterializeOptions, MaterializeOutcome,
    },
    mri::{
        copy_mri_file, list_mri_files, mri_behavior_files, parse_mri_folder, plan_mri_copies,
        write_mri_events,
    },
    plot::{timing_histogram, timing_scatter, Figure, Series},
    visual_field::{copy_visual_field, copy_visual_field_to_derivatives, plan_visual_field},
    BatchReport, Parsed, ProjectConfig, RuleSet, Study,
};
use plotters::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Files handled as run recordings by `fix-runs`.
const RECORDING_EXTENSIONS: &[&str] = &["vhdr", "edf", "bdf", "fif", "set"];

/// Number of files processed by `bidsify --test`.
const TEST_LIMIT: usize = 10;

#[derive(Parser)]
#[command(
    name = "nbids",
    version,
    about = "Raw lab recordings to BIDS: naming, event alignment, audits"
)]
struct Cli {
    /// Project configuration (.yaml, .yml or .toml)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the parse outcome of raw paths as JSON lines
    ParseName {
        paths: Vec<PathBuf>,
        /// Rule set to use instead of the configured one
        #[arg(long)]
        study: Option<Study>,
    },
    /// Write participants.tsv and dataset_description.json
    Init {
        #[arg(long)]
        overwrite: bool,
        /// List participants from the BIDS tree instead of raw subject folders
        #[arg(long)]
        from_bids: bool,
    },
    /// Copy recognized raw files into the BIDS tree
    Bidsify {
        #[arg(long, num_args = 1.., required = true)]
        subjects: Vec<String>,
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, hide = true)]
        test: bool,
    },
    /// Align triggers with behavior logs and write *_events.tsv
    AlignEvents {
        #[arg(long, num_args = 1.., required_unless_present = "behavior")]
        subjects: Vec<String>,
        /// Align a single run from this behavior log
        #[arg(long, requires_all = ["triggers", "out"])]
        behavior: Option<PathBuf>,
        /// Trigger table (.tsv) or EDF recording of the single run
        #[arg(long, requires = "behavior")]
        triggers: Option<PathBuf>,
        #[arg(long, requires = "behavior")]
        out: Option<PathBuf>,
    },
    /// Drop events whose timing disagrees with behavior; write *_filtered.tsv
    CheckEvents {
        #[arg(long, num_args = 1.., required = true)]
        subjects: Vec<String>,
        #[arg(long, default_value = "saved_plots")]
        plots_dir: PathBuf,
        #[arg(long)]
        no_plots: bool,
    },
    /// Give recordings numeric run labels, moving sidecars along
    FixRuns {
        #[arg(long, num_args = 1.., required = true)]
        subjects: Vec<String>,
        /// Apply the renames; without it only the plan is printed
        #[arg(long)]
        yes: bool,
    },
    /// Copy scanner exports (NIfTI, JSON, bval, bvec) into the BIDS tree
    AddMri {
        /// Participants, as in the export folder names (0001 or sub-0001)
        #[arg(long, num_args = 1.., required = true)]
        subjects: Vec<String>,
        #[arg(long)]
        overwrite: bool,
        /// Apply the copies; without it only the plan is printed
        #[arg(long)]
        yes: bool,
    },
    /// Write func/*_events.tsv from the behavior logs of MRI sessions
    MriEvents {
        #[arg(long, num_args = 1.., required = true)]
        subjects: Vec<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Copy visual-field folders and reports, and the group data to derivatives
    VisualField {
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Count raw files per extension over included participants
    FileTypes {
        #[arg(long)]
        json: bool,
    },
    /// Set the type of named channels in *_channels.tsv
    PatchChannels {
        #[arg(long, value_delimiter = ',', default_value = "X,Y,Z")]
        names: Vec<String>,
        #[arg(long = "type", default_value = "misc")]
        channel_type: String,
        #[arg(long)]
        yes: bool,
    },
    /// Audit behavior exports for missing, extra or broken runs
    AuditBehavior {
        /// Behavior root (defaults to raw_dir)
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Structural BIDS checks; exits with 1 on errors
    Validate {
        #[arg(long)]
        json: bool,
    },
    /// Count visit sessions per participant group
    Sessions {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::ParseName { paths, study } => cmd_parse_name(&cli.config, &paths, study)?,
        Commands::Init {
            overwrite,
            from_bids,
        } => cmd_init(&load_config(&cli.config)?, overwrite, from_bids)?,
        Commands::Bidsify {
            subjects,
            overwrite,
            dry_run,
            limit,
            test,
        } => {
            let limit = if test { Some(TEST_LIMIT) } else { limit };
            let opts = MaterializeOptions {
                overwrite: overwrite || test,
                dry_run,
            };
            cmd_bidsify(&load_config(&cli.config)?, &subjects, opts, limit)?
        }
        Commands::AlignEvents {
            subjects,
            behavior,
            triggers,
            out,
        } => {
            let cfg = load_config(&cli.config)?;
            match (behavior, triggers, out) {
                (Some(behavior), Some(triggers), Some(out)) => {
                    cmd_align_single(&cfg, &behavior, &triggers, &out)?
                }
                _ => cmd_align_batch(&cfg, &subjects)?,
            }
        }
        Commands::CheckEvents {
            subjects,
            plots_dir,
            no_plots,
        } => {
            let plots = (!no_plots).then_some(plots_dir.as_path());
            cmd_check_events(&load_config(&cli.config)?, &subjects, plots)?
        }
        Commands::FixRuns { subjects, yes } => {
            cmd_fix_runs(&load_config(&cli.config)?, &subjects, !yes)?
        }
        Commands::AddMri {
            subjects,
            overwrite,
            yes,
        } => {
            let opts = MaterializeOptions {
                overwrite,
                dry_run: !yes,
            };
            cmd_add_mri(&load_config(&cli.config)?, &subjects, opts)?
        }
        Commands::MriEvents { subjects, dry_run } => {
            cmd_mri_events(&load_config(&cli.config)?, &subjects, dry_run)?
        }
        Commands::VisualField { overwrite, dry_run } => {
            let opts = MaterializeOptions { overwrite, dry_run };
            cmd_visual_field(&load_config(&cli.config)?, opts)?
        }
        Commands::FileTypes { json } => {
            let cfg = load_config(&cli.config)?;
            print_report(&file_type_stats(&cfg.raw_dir)?, json)?;
        }
        Commands::PatchChannels {
            names,
            channel_type,
            yes,
        } => cmd_patch_channels(&load_config(&cli.config)?, &names, &channel_type, !yes)?,
        Commands::AuditBehavior { root, json } => {
            let cfg = load_config(&cli.config)?;
            let root = root.unwrap_or_else(|| cfg.raw_dir.clone());
            let audit = audit_behavior(&root, &cfg.experiment)?;
            print_report(&audit, json)?;
        }
        Commands::Validate { json } => {
            let cfg = load_config(&cli.config)?;
            let report = validate_bids(&cfg.bids_dir)?;
            print_report(&report, json)?;
            if !report.is_valid() {
                std::process::exit(1);
            }
        }
        Commands::Sessions { json } => {
            let cfg = load_config(&cli.config)?;
            print_report(&session_summary(&cfg.raw_dir)?, json)?;
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<ProjectConfig> {
    ProjectConfig::load(path).with_context(|| {
        format!(
            "configuration {} could not be loaded (use --config)",
            path.display()
        )
    })
}

fn print_report<T: Serialize + std::fmt::Display>(report: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

fn cmd_parse_name(config: &Path, paths: &[PathBuf], study: Option<Study>) -> Result<()> {
    let experiment = if config.is_file() {
        Some(load_config(config)?.experiment)
    } else {
        None
    };
    let study = study
        .or_else(|| experiment.as_ref().map(|e| e.study))
        .unwrap_or_default();
    let rules = RuleSet::for_study(study)
        .with_task(experiment.as_ref().and_then(|e| e.task.as_deref()));
    for path in paths {
        let parsed = rules.parse_path(path);
        let line = serde_json::json!({ "path": path, "result": parsed });
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

fn cmd_init(cfg: &ProjectConfig, overwrite: bool, from_bids: bool) -> Result<()> {
    let participants = if from_bids {
        participants_from_bids(&cfg.bids_dir)?
    } else {
        collect_participants(&cfg.raw_dir)?
    };
    let outcome = write_participants_tsv(&cfg.bids_dir, &participants, overwrite)?;
    report_write("participants.tsv", outcome);
    let outcome = write_dataset_description(&cfg.bids_dir, &cfg.dataset, overwrite)?;
    report_write("dataset_description.json", outcome);
    Ok(())
}

fn report_write(name: &str, outcome: WriteOutcome) {
    match outcome {
        WriteOutcome::Written => println!("{name} written"),
        WriteOutcome::Skipped => println!("{name} exists, kept (use --overwrite)"),
    }
}

fn wanted_subject(subject: &str, subjects: &[String]) -> bool {
    subjects.is_empty()
        || subjects
            .iter()
            .any(|s| s.trim_start_matches("sub-") == subject)
}

fn cmd_bidsify(
    cfg: &ProjectConfig,
    subjects: &[String],
    opts: MaterializeOptions,
    limit: Option<usize>,
) -> Result<()> {
    let rules = RuleSet::for_experiment(&cfg.experiment);
    let files = walk_files(&cfg.raw_dir, &[])?;
    info!("{} files under {}", files.len(), cfg.raw_dir.display());

    let mut report = BatchReport::default();
    let mut selected = Vec::new();
    let mut unrecognized = Vec::new();
    let mut companions = HashSet::new();
    for source in &files {
        let rel = source.strip_prefix(&cfg.raw_dir).unwrap_or(source);
        match rules.parse_path(rel) {
            Parsed::Recognized(parsed) => {
                match find_sidecars(source) {
                    Ok(found) => companions.extend(found),
                    Err(err) => warn!("{}: sidecars not listed: {err:#}", source.display()),
                }
                if wanted_subject(&parsed.entities.subject, subjects) {
                    selected.push((source, rel, parsed));
                }
            }
            Parsed::Unrecognized => unrecognized.push(source),
        }
    }
    for source in unrecognized {
        if !companions.contains(source) {
            report.record_unrecognized(source);
        }
    }
    if let Some(limit) = limit {
        selected.truncate(limit);
    }
    info!("{} recordings selected", selected.len());

    for (source, rel, parsed) in &selected {
        match materialize(source, parsed, &cfg.bids_dir, opts) {
            Ok(MaterializeOutcome::Copied { destination, .. }) => {
                println!("✓ {} -> {}", parsed.entities.context(), destination.display());
                report.record_processed();
            }
            Ok(MaterializeOutcome::Planned { destination }) => {
                println!("would copy {} -> {}", rel.display(), destination.display());
                report.record_processed();
            }
            Ok(MaterializeOutcome::Skipped { .. }) => report.record_skipped(),
            Err(err) => report.record_failure(source, format!("{err:#}")),
        }
    }
    println!("{report}");
    Ok(())
}

fn cmd_align_single(
    cfg: &ProjectConfig,
    behavior: &Path,
    triggers: &Path,
    out: &Path,
) -> Result<()> {
    let aligned = align_files(behavior, triggers, out, &cfg.alignment)?;
    println!("{}", serde_json::to_string(&aligned.validation)?);
    Ok(())
}

fn cmd_align_batch(cfg: &ProjectConfig, subjects: &[String]) -> Result<()> {
    let datatype = &cfg.alignment.trigger_datatype;
    let behavior_files = glob_files(&cfg.bids_dir, "**/*_beh.tsv", &["derivatives"])?;
    let mut report = BatchReport::default();
    for behavior in filter_subjects(behavior_files, subjects) {
        let Some(triggers) = locate_triggers(&behavior, datatype) else {
            report.record_failure(&behavior, "no trigger table or recording for this run");
            continue;
        };
        let Some(out) = events_path_for(&behavior, datatype) else {
            report.record_unrecognized(&behavior);
            continue;
        };
        match align_files(&behavior, &triggers, &out, &cfg.alignment) {
            Ok(aligned) => {
                for kind in &aligned.reconstructed {
                    println!("{}: {kind} rebuilt from behavior", out.display());
                }
                println!("✓ {}", out.display());
                report.record_processed();
            }
            Err(err) => report.record_failure(&behavior, format!("{err:#}")),
        }
    }
    println!("{report}");
    Ok(())
}

fn cmd_check_events(
    cfg: &ProjectConfig,
    subjects: &[String],
    plots_dir: Option<&Path>,
) -> Result<()> {
    let events_files = glob_files(&cfg.bids_dir, "**/*_events.tsv", &["derivatives"])?;
    let mut report = BatchReport::default();
    for path in filter_subjects(events_files, subjects) {
        let checked = match Table::read(&path)
            .and_then(|t| check_timing(&t, cfg.alignment.timing_tolerance_s).map_err(Into::into))
        {
            Ok(checked) => checked,
            Err(err) => {
                report.record_failure(&path, format!("{err:#}"));
                continue;
            }
        };
        let out = match write_filtered(&checked, &path) {
            Ok(out) => out,
            Err(err) => {
                report.record_failure(&path, format!("{err:#}"));
                continue;
            }
        };
        println!(
            "{}: {} of {} events removed",
            out.display(),
            checked.removed(),
            checked.kinds.len()
        );
        if let Some(root) = plots_dir {
            match plot_dir(root, &path) {
                Some(dir) => {
                    if let Err(err) = save_timing_plots(&dir, &checked) {
                        report.record_failure(&path, format!("plots: {err:#}"));
                        continue;
                    }
                }
                None => warn!("{}: no sub/ses/run in name, plots skipped", path.display()),
            }
        }
        report.record_processed();
    }
    println!("{report}");
    Ok(())
}

fn save_timing_plots(dir: &Path, checked: &CheckedEvents) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for kind in [EventKind::Response, EventKind::Feedback] {
        for (stage, after) in [("before", false), ("after", true)] {
            let pairs = checked.diff_pairs(kind, after);
            let fig = timing_scatter(&format!("{kind} timing ({stage} filtering)"), &pairs, 2048);
            draw_plotters_figure(&dir.join(format!("{kind}_{stage}.png")), &fig)?;
        }
        let pairs = checked.diff_pairs(kind, true);
        let fig = timing_histogram(&format!("{kind} interval differences"), &pairs);
        draw_plotters_figure(&dir.join(format!("{kind}_diff.png")), &fig)?;
    }
    Ok(())
}

fn cmd_fix_runs(cfg: &ProjectConfig, subjects: &[String], dry_run: bool) -> Result<()> {
    let recordings: Vec<PathBuf> = walk_files(&cfg.bids_dir, &["derivatives", "sourcedata"])?
        .into_iter()
        .filter(|p| {
            p.extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .is_some_and(|ext| RECORDING_EXTENSIONS.contains(&ext.as_str()))
        })
        .collect();
    let mut report = BatchReport::default();
    for path in filter_subjects(recordings, subjects) {
        match rename_with_sidecars(&path, dry_run) {
            Ok(moves) if moves.is_empty() => report.record_skipped(),
            Ok(moves) => {
                for (from, to) in &moves {
                    let verb = if dry_run { "would move" } else { "moved" };
                    println!("{verb} {} -> {}", from.display(), to.display());
                }
                report.record_processed();
            }
            Err(err) => report.record_failure(&path, format!("{err:#}")),
        }
    }
    if dry_run && report.processed > 0 {
        println!("dry run: pass --yes to apply");
    }
    println!("{report}");
    Ok(())
}

fn report_outcome(report: &mut BatchReport, label: &str, outcome: Result<MaterializeOutcome>) {
    match outcome {
        Ok(MaterializeOutcome::Copied { destination, .. }) => {
            println!("✓ {label} -> {}", destination.display());
            report.record_processed();
        }
        Ok(MaterializeOutcome::Planned { destination }) => {
            println!("would copy {label} -> {}", destination.display());
            report.record_processed();
        }
        Ok(MaterializeOutcome::Skipped { .. }) => report.record_skipped(),
        Err(err) => report.record_failure(Path::new(label), format!("{err:#}")),
    }
}

fn cmd_add_mri(cfg: &ProjectConfig, subjects: &[String], opts: MaterializeOptions) -> Result<()> {
    let mri_dir = cfg.mri_dir();
    let mut folders: Vec<PathBuf> = std::fs::read_dir(&mri_dir)
        .with_context(|| format!("listing {}", mri_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    folders.sort();
    let session = &cfg.experiment.mri_session;
    let mut report = BatchReport::default();
    for folder in folders {
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(participant) = parse_mri_folder(&name) else {
            report.record_unrecognized(&folder);
            continue;
        };
        if !wanted_subject(&participant.subject, subjects) {
            continue;
        }
        let files = match list_mri_files(&folder) {
            Ok(files) => files,
            Err(err) => {
                report.record_failure(&folder, format!("{err:#}"));
                continue;
            }
        };
        for (kind, paths) in &files {
            println!("sub-{} {kind}: {} files", participant.subject, paths.len());
        }
        for copy in plan_mri_copies(&files, &participant.subject, session, &cfg.bids_dir) {
            let label = copy.source.display().to_string();
            report_outcome(&mut report, &label, copy_mri_file(&copy, opts));
        }
    }
    if opts.dry_run && report.processed > 0 {
        println!("dry run: pass --yes to apply");
    }
    println!("{report}");
    Ok(())
}

fn cmd_mri_events(cfg: &ProjectConfig, subjects: &[String], dry_run: bool) -> Result<()> {
    let mut report = BatchReport::default();
    for subject in subjects {
        let files = match mri_behavior_files(&cfg.bids_dir, subject) {
            Ok(files) => files,
            Err(err) => {
                report.record_failure(Path::new(subject), format!("{err:#}"));
                continue;
            }
        };
        if files.is_empty() {
            warn!("{subject}: no behavior logs in MRI sessions");
        }
        for behavior in files {
            match write_mri_events(&behavior, dry_run) {
                Ok(out) => {
                    let verb = if dry_run { "would write" } else { "wrote" };
                    println!("{verb} {}", out.display());
                    report.record_processed();
                }
                Err(err) => report.record_failure(&behavior, format!("{err:#}")),
            }
        }
    }
    println!("{report}");
    Ok(())
}

fn cmd_visual_field(cfg: &ProjectConfig, opts: MaterializeOptions) -> Result<()> {
    let mut report = BatchReport::default();
    for item in plan_visual_field(&cfg.raw_dir, &cfg.bids_dir)? {
        let label = item.source.display().to_string();
        report_outcome(&mut report, &label, copy_visual_field(&item, opts));
    }
    let derivatives = cfg.derivatives_dir();
    match copy_visual_field_to_derivatives(&cfg.raw_dir, &derivatives, opts) {
        Ok(None) => warn!("no group visual-field data under {}", cfg.raw_dir.display()),
        Ok(Some(outcome)) => report_outcome(&mut report, "data-VisualField", Ok(outcome)),
        Err(err) => report_outcome(&mut report, "data-VisualField", Err(err)),
    }
    println!("{report}");
    Ok(())
}

fn cmd_patch_channels(
    cfg: &ProjectConfig,
    names: &[String],
    channel_type: &str,
    dry_run: bool,
) -> Result<()> {
    let channel_files = glob_files(&cfg.bids_dir, "**/*_channels.tsv", &["derivatives"])?;
    println!("{} channels.tsv files found", channel_files.len());
    let mut report = BatchReport::default();
    for path in channel_files {
        match patch_channel_types(&path, names, channel_type, dry_run) {
            Ok(0) => report.record_skipped(),
            Ok(rows) => {
                let verb = if dry_run { "would modify" } else { "modified" };
                println!("{verb} {} ({rows} rows)", path.display());
                report.record_processed();
            }
            Err(err) => report.record_failure(&path, format!("{err:#}")),
        }
    }
    if dry_run && report.processed > 0 {
        println!("dry run: pass --yes to apply");
    }
    println!("{report}");
    Ok(())
}

fn draw_plotters_figure(path: &Path, fig: &Figure) -> Result<()> {
    let backend = BitMapBackend::new(path, (800, 600));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let (x_min, x_max, y_min, y_max) = fig.bounds().unwrap_or((0.0, 1.0, 0.0, 1.0));
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .y_desc(fig.y.label.clone().unwrap_or_default())
        .draw()?;
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                let (r, g, b) = line.style.color.rgb();
                let width = line.style.width.round().max(1.0) as u32;
                let style = RGBColor(r, g, b).stroke_width(width);
                chart.draw_series(LineSeries::new(
                    line.points.iter().map(|p| (p[0], p[1])),
                    style,
                ))?;
            }
            Series::Scatter(scatter) => {
                let (r, g, b) = scatter.color.rgb();
                let style = RGBColor(r, g, b).mix(0.7).filled();
                chart.draw_series(
                    scatter
                        .points
                        .iter()
                        .map(|p| Circle::new((p[0], p[1]), scatter.radius, style)),
                )?;
            }
            Series::Histogram(hist) => {
                let (r, g, b) = hist.color.rgb();
                let style = RGBColor(r, g, b).mix(0.7).filled();
                chart.draw_series(hist.counts.iter().enumerate().map(|(i, count)| {
                    let x0 = hist.start + i as f64 * hist.bin_width;
                    Rectangle::new([(x0, 0.0), (x0 + hist.bin_width, *count as f64)], style)
                }))?;
            }
        }
    }
    root.present()
        .map_err(|e| anyhow!("writing {}: {e}", path.display()))?;
    Ok(())
}
