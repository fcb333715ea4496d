use console::Style;
use stellacap_core::calibration::store::StoreSummary;
use stellacap_core::calibration::{CalibrationDetails, MasterSummary};
use stellacap_core::config::AppConfig;
use stellacap_core::orchestrator::OrchestratorStats;
use stellacap_core::solve::PlateSolveResult;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    good: Style,
    disabled: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            good: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn title(s: &Styles, text: &str) {
    println!();
    println!("  {}", s.title.apply_to(text));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(text.chars().count())));
    println!();
}

fn yes_no(s: &Styles, v: bool) -> String {
    if v {
        s.good.apply_to("yes").to_string()
    } else {
        s.disabled.apply_to("no").to_string()
    }
}

pub fn print_masters_summary(summary: &MasterSummary) {
    let s = Styles::new();
    title(&s, "Master Frames");

    match &summary.bias {
        Some(m) => println!(
            "  {:<14}{} {}",
            s.label.apply_to("Bias"),
            s.path.apply_to(m.path.display()),
            s.label.apply_to(format!("({} frames)", m.frames_used))
        ),
        None => println!("  {:<14}{}", s.label.apply_to("Bias"), s.disabled.apply_to("none")),
    }

    println!("  {}", s.header.apply_to("Darks"));
    if summary.darks.is_empty() {
        println!("    {}", s.disabled.apply_to("none"));
    }
    for m in &summary.darks {
        println!(
            "    {:<12}{} {}",
            s.value.apply_to(format!("{:.3}s", m.exposure_time)),
            s.path.apply_to(m.path.display()),
            s.label.apply_to(format!("({} frames, {} skipped)", m.frames_used, m.skipped))
        );
    }

    match &summary.flat {
        Some(m) => println!(
            "  {:<14}{} {}",
            s.label.apply_to("Flat"),
            s.path.apply_to(m.path.display()),
            s.label.apply_to(format!("({} frames)", m.frames_used))
        ),
        None => println!("  {:<14}{}", s.label.apply_to("Flat"), s.disabled.apply_to("none")),
    }

    if !summary.failures.is_empty() {
        println!();
        println!("  {}", s.header.apply_to("Failures"));
        for f in &summary.failures {
            println!("    {}", s.disabled.apply_to(f));
        }
    }
    println!();
}

pub fn print_store_summary(summary: &StoreSummary) {
    let s = Styles::new();
    title(&s, "Loaded Masters");
    let entries = summary
        .bias
        .iter()
        .map(|i| ("Bias", i))
        .chain(summary.darks.iter().map(|i| ("Dark", i)))
        .chain(summary.flat.iter().map(|i| ("Flat", i)));
    for (kind, info) in entries {
        let exposure = info
            .exposure_time
            .map(|e| format!("{e:.3}s"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<6}{:<10}{:<12}{}",
            s.label.apply_to(kind),
            s.value.apply_to(exposure),
            s.label.apply_to(format!("{}x{}", info.shape.1, info.shape.0)),
            s.path.apply_to(info.file.display())
        );
    }
    println!();
}

pub fn print_calibration(details: &CalibrationDetails) {
    let s = Styles::new();
    title(&s, "Calibration");
    println!("  {:<14}{}", s.label.apply_to("Dark"), yes_no(&s, details.dark_applied));
    if let Some(p) = &details.master_dark {
        println!("    {:<12}{}", s.label.apply_to("Master"), s.path.apply_to(p.display()));
    }
    if details.dark_fallback {
        println!("    {}", s.disabled.apply_to("nearest exposure used (outside tolerance)"));
    }
    if let Some(r) = &details.dark_skip_reason {
        println!("    {:<12}{}", s.label.apply_to("Skipped"), s.disabled.apply_to(r));
    }
    println!("  {:<14}{}", s.label.apply_to("Flat"), yes_no(&s, details.flat_applied));
    if let Some(p) = &details.master_flat {
        println!("    {:<12}{}", s.label.apply_to("Master"), s.path.apply_to(p.display()));
    }
    if let Some(r) = &details.flat_skip_reason {
        println!("    {:<12}{}", s.label.apply_to("Skipped"), s.disabled.apply_to(r));
    }
    println!("  {:<14}{}", s.label.apply_to("Reoriented"), yes_no(&s, details.reoriented));
    println!();
}

pub fn print_solve(result: &PlateSolveResult) {
    let s = Styles::new();
    title(&s, "Plate Solution");
    let rows = [
        ("RA", format!("{:.5}°", result.ra_center)),
        ("Dec", format!("{:.5}°", result.dec_center)),
        ("Field", format!("{:.4}° x {:.4}°", result.fov_width, result.fov_height)),
        ("Angle", format!("{:.2}°", result.position_angle)),
        ("Flipped", if result.is_flipped { "yes".into() } else { "no".into() }),
        ("Time", format!("{:.1}s", result.solving_time.as_secs_f64())),
    ];
    for (label, value) in rows {
        println!("  {:<14}{}", s.label.apply_to(label), s.value.apply_to(value));
    }
    if let Some(scale) = result.pixel_scale {
        println!("  {:<14}{}", s.label.apply_to("Scale"), s.value.apply_to(format!("{scale:.3}\"/px")));
    }
    if let Some(stars) = result.stars_detected {
        println!("  {:<14}{}", s.label.apply_to("Stars"), s.value.apply_to(stars));
    }
    println!();
}

pub fn print_run_header(config: &AppConfig) {
    let s = Styles::new();
    title(&s, "Stellacap Capture");
    let c = &config.capture;
    println!("  {:<14}{}", s.label.apply_to("Exposure"), s.value.apply_to(format!("{:.3}s", c.exposure_time)));
    println!("  {:<14}{}", s.label.apply_to("Interval"), s.value.apply_to(format!("{:.1}s", c.interval_secs)));
    println!("  {:<14}{}", s.label.apply_to("Output"), s.path.apply_to(c.output_dir.display()));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Calibration"),
        yes_no(&s, config.calibration.enabled)
    );
    println!("  {:<14}{}", s.label.apply_to("Solving"), yes_no(&s, config.solver.enabled));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Gating"),
        if config.gating.enabled {
            s.good.apply_to(config.gating.policy.to_string()).to_string()
        } else {
            s.disabled.apply_to("off").to_string()
        }
    );
    println!();
}

pub fn print_run_summary(stats: &OrchestratorStats) {
    let s = Styles::new();
    title(&s, "Run Summary");
    let rows = [
        ("Cycles", stats.cycles),
        ("Captures", stats.capture_count),
        ("Solves", stats.solve_count),
        ("Solved", stats.successful_solves),
        ("Skipped", stats.skipped_cycles),
        ("Discarded", stats.discarded_cycles),
        ("Failed", stats.failed_cycles),
    ];
    for (label, value) in rows {
        println!("  {:<14}{}", s.label.apply_to(label), s.value.apply_to(value));
    }
    if let Some(r) = &stats.last_discard_reason {
        println!("  {:<14}{}", s.label.apply_to("Last skip"), s.disabled.apply_to(r));
    }
    if let Some(e) = &stats.last_error {
        println!("  {:<14}{}", s.label.apply_to("Last error"), s.disabled.apply_to(e));
    }
    println!();
}
