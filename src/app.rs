use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::time::Duration;

use clap::{error::ErrorKind, CommandFactory, Parser};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use regex::Regex;
use tokio::sync::mpsc;
use tracing::Level;

use crate::classifier::FilterSet;
use crate::cli::args::CliArgs;
use crate::cli::validation;
use crate::config::{self, ConfigFile};
use crate::controller::{Command, RecursionMode, ScanOptions, TargetOutcome};
use crate::dictionary::WordlistSource;
use crate::output::{self, OutputFormat, ViewOptions};
use crate::requester::{AuthKind, RequesterConfig};
use crate::runner::{self, Options, Runner};
use crate::utils;

fn print_banner() {
    const BANNER: &str = r#"
    __    _     ___
   / /_  (_)___/ (_)____
  / __ \/ / __  / / ___/
 / / / / / /_/ / / /
/_/ /_/_/\__,_/_/_/
       hidden directory scanner
    "#;
    print!("{}", BANNER);
    println!();
}

fn format_kv_line(label: &str, value: &str) {
    println!(":: {:<10}: {}", label, value);
}

fn render_custom_help() -> String {
    let cmd = CliArgs::command();
    let mut out = String::new();

    out.push_str(cmd.get_name());
    if let Some(version) = cmd.get_version() {
        out.push(' ');
        out.push_str(version);
    }
    out.push('\n');
    if let Some(long_about) = cmd.get_long_about().or_else(|| cmd.get_about()) {
        out.push_str(&long_about.to_string());
        out.push('\n');
    }
    out.push_str(&format!("\nUsage: {} [OPTIONS]\n\n", cmd.get_name()));

    // headings in first-seen order
    let mut sections: Vec<(String, Vec<&clap::Arg>)> = Vec::new();
    for arg in cmd.get_arguments().filter(|a| !a.is_hide_set()) {
        let heading = arg.get_help_heading().unwrap_or("Options").to_string();
        match sections.iter_mut().find(|(h, _)| *h == heading) {
            Some((_, args)) => args.push(arg),
            None => sections.push((heading, vec![arg])),
        }
    }

    for (heading, args) in sections {
        out.push_str(&format!("{heading}:\n"));
        for arg in args {
            let mut parts: Vec<String> = Vec::new();
            if let Some(short) = arg.get_short() {
                parts.push(format!("-{short}"));
            }
            if let Some(long) = arg.get_long() {
                parts.push(format!("--{long}"));
            }
            for alias in arg.get_visible_aliases().unwrap_or_default() {
                parts.push(format!("--{alias}"));
            }
            let mut flags = parts.join(", ");
            if arg.get_action().takes_values() {
                let value_name = arg
                    .get_value_names()
                    .and_then(|names| names.first())
                    .map(|name| name.as_str())
                    .unwrap_or("VALUE");
                flags.push_str(&format!(" <{value_name}>"));
            }
            out.push_str(&format!("  {flags}\n"));
            if let Some(help) = arg.get_help() {
                let help = help.to_string();
                if !help.trim().is_empty() {
                    out.push_str(&format!("          {}\n", help.trim()));
                }
            }
            out.push('\n');
        }
    }
    out
}

fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn format_codes(codes: &HashSet<u16>) -> String {
    if codes.is_empty() {
        return "none".to_string();
    }
    let mut codes = codes.iter().copied().collect::<Vec<_>>();
    codes.sort_unstable();
    codes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn recursion_label(mode: RecursionMode) -> &'static str {
    match mode {
        RecursionMode::Off => "off",
        RecursionMode::Plain => "plain",
        RecursionMode::Deep => "deep",
        RecursionMode::Forced => "forced",
    }
}

fn outcome_label(outcome: &TargetOutcome) -> String {
    match outcome {
        TargetOutcome::Completed => "completed".to_string(),
        TargetOutcome::CircuitBreakerTripped => "too many consecutive errors".to_string(),
        TargetOutcome::SkippedOnStatus(code) => format!("skipped on status {code}"),
        TargetOutcome::TimedOut => "max time reached".to_string(),
        TargetOutcome::Skipped => "skipped by operator".to_string(),
        TargetOutcome::Quit => "quit by operator".to_string(),
    }
}

fn parse_codes(flag: &str, raw: Option<String>) -> Result<HashSet<u16>, String> {
    match raw.filter(|r| !r.trim().is_empty()) {
        Some(raw) => {
            utils::parse_u16_set_csv(&raw).map_err(|e| format!("invalid {flag} '{raw}': {e}"))
        }
        None => Ok(HashSet::new()),
    }
}

fn parse_regex(flag: &str, raw: Option<String>) -> Result<Option<Regex>, String> {
    match raw.filter(|r| !r.trim().is_empty()) {
        Some(raw) => Regex::new(&raw)
            .map(Some)
            .map_err(|e| format!("invalid {flag} '{raw}': {e}")),
        None => Ok(None),
    }
}

fn log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}

fn init_logging(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Maps an answer to the interrupt prompt.
fn parse_operator_answer(answer: &str) -> Option<Command> {
    match answer.trim().to_lowercase().as_str() {
        "q" | "quit" => Some(Command::Quit),
        "c" | "continue" => Some(Command::Resume),
        "n" | "next" => Some(Command::SkipTarget),
        _ => None,
    }
}

fn prompt_operator() -> Command {
    loop {
        eprint!("[q]uit / [c]ontinue / [n]ext target: ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => return Command::Quit,
            Ok(_) => {}
        }
        if let Some(command) = parse_operator_answer(&line) {
            return command;
        }
    }
}

// Ctrl+C pauses the scan and asks the operator what to do next. When stdin
// feeds the targets there is nobody to ask, so it quits.
fn spawn_interrupt_handler(pb: ProgressBar, tx: mpsc::Sender<Command>, interactive: bool) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                break;
            }
            let command = if interactive {
                if tx.send(Command::Pause).await.is_err() {
                    break;
                }
                let pb = pb.clone();
                tokio::task::spawn_blocking(move || pb.suspend(prompt_operator))
                    .await
                    .unwrap_or(Command::Quit)
            } else {
                Command::Quit
            };
            if tx.send(command).await.is_err() || command == Command::Quit {
                break;
            }
        }
    });
}

#[derive(Clone, Debug)]
struct RunConfig {
    options: Options,
    output: Option<String>,
    output_format: Option<OutputFormat>,
    no_color: bool,
    quiet: bool,
    verbose: u8,
}

fn build_run_config(args: CliArgs, cfg: ConfigFile) -> Result<RunConfig, String> {
    validation::validate(&args)?;

    let no_color = args.no_color || cfg.no_color.unwrap_or(false);
    let quiet = args.quiet || cfg.quiet.unwrap_or(false);

    // targets
    let urls = if args.url.is_empty() {
        cfg.urls.unwrap_or_default()
    } else {
        args.url
    };
    let url_file = args.url_file.or(cfg.url_file);
    let cidr = args.cidr.or(cfg.cidr);

    // dictionary
    let wordlists = if args.wordlists.is_empty() {
        cfg.wordlists.unwrap_or_default()
    } else {
        args.wordlists
    };
    let wordlists = wordlists
        .into_iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .map(WordlistSource::FilePath)
        .collect::<Vec<_>>();
    let dict_dir = args
        .dict_dir
        .unwrap_or_else(|| runner::DEFAULT_DICT_DIR.to_string());

    // filters
    let include_raw = args.include_status.or(cfg.include_status);
    let exclude_raw = args.exclude_status.or(cfg.exclude_status);
    let default_exclude = include_raw.is_none() && exclude_raw.is_none();
    let include_status_codes = parse_codes("--include-status", include_raw)?;
    let mut exclude_status_codes = parse_codes("--exclude-status", exclude_raw)?;
    if default_exclude {
        exclude_status_codes.insert(404);
    }
    let exclude_sizes = match args.exclude_sizes.or(cfg.exclude_sizes) {
        Some(raw) if !raw.trim().is_empty() => utils::parse_usize_set_csv(&raw)
            .map_err(|e| format!("invalid --exclude-sizes '{raw}': {e}"))?,
        _ => HashSet::new(),
    };
    let exclude_texts = if args.exclude_texts.is_empty() {
        cfg.exclude_texts.unwrap_or_default()
    } else {
        args.exclude_texts
    };
    let minimum_response_size = args.min_response_size.or(cfg.min_response_size).unwrap_or(0);
    let maximum_response_size = args.max_response_size.or(cfg.max_response_size).unwrap_or(0);
    if maximum_response_size > 0 && minimum_response_size > maximum_response_size {
        return Err(format!(
            "invalid response size bounds, minimum {minimum_response_size} is above maximum {maximum_response_size}"
        ));
    }
    let filters = FilterSet {
        exclude_status_codes,
        include_status_codes,
        minimum_response_size,
        maximum_response_size,
        exclude_texts,
        exclude_sizes,
        exclude_regex: parse_regex("--exclude-regex", args.exclude_regex.or(cfg.exclude_regex))?,
        exclude_redirect: parse_regex(
            "--exclude-redirect",
            args.exclude_redirect.or(cfg.exclude_redirect),
        )?,
        blacklists: cfg.blacklists.unwrap_or_default(),
    };

    // scan
    let deep = args.deep_recursive || cfg.deep_recursive.unwrap_or(false);
    let forced = args.force_recursive || cfg.force_recursive.unwrap_or(false);
    if deep && forced {
        return Err("use either deep or forced recursion, not both".to_string());
    }
    let recursion = if deep {
        RecursionMode::Deep
    } else if forced {
        RecursionMode::Forced
    } else if args.recursive || cfg.recursive.unwrap_or(false) {
        RecursionMode::Plain
    } else {
        RecursionMode::Off
    };
    let workers = args.workers.or(cfg.workers).unwrap_or(25);
    if workers == 0 {
        return Err("invalid workers, expected positive integer".to_string());
    }
    let max_time = args.max_time.or(cfg.max_time).unwrap_or(0);
    let scan = ScanOptions {
        workers,
        recursion,
        max_recursion_depth: args
            .max_recursion_depth
            .or(cfg.max_recursion_depth)
            .unwrap_or(0),
        recursion_status_codes: parse_codes(
            "--recursion-status",
            args.recursion_status.or(cfg.recursion_status),
        )?,
        subdirs: utils::split_csv(&args.subdirs.or(cfg.subdirs).unwrap_or_default()),
        exclude_subdirs: utils::split_csv(
            &args.exclude_subdirs.or(cfg.exclude_subdirs).unwrap_or_default(),
        ),
        delay: Duration::from_millis(args.delay.or(cfg.delay).unwrap_or(0)),
        max_rate: args.max_rate.or(cfg.max_rate).unwrap_or(0),
        max_consecutive_errors: args
            .max_errors
            .or(cfg.max_errors)
            .unwrap_or(crate::controller::MAX_CONSECUTIVE_REQUEST_ERRORS),
        skip_on_status: parse_codes(
            "--skip-on-status",
            args.skip_on_status.or(cfg.skip_on_status),
        )?,
        max_time: (max_time > 0).then(|| Duration::from_secs(max_time)),
        exit_on_error: args.exit_on_error || cfg.exit_on_error.unwrap_or(false),
        replay_proxy: args
            .replay_proxy
            .or(cfg.replay_proxy)
            .filter(|p| !p.trim().is_empty()),
    };

    // request
    let mut request = RequesterConfig::default();
    if let Some(method) = args.method.or(cfg.method) {
        request.method = reqwest::Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|_| format!("invalid method '{method}'"))?;
    }
    request.data = args.data.or(cfg.data);
    if let Some(credential) = args.auth.or(cfg.auth) {
        let kind_raw = args
            .auth_type
            .or(cfg.auth_type)
            .unwrap_or_else(|| "basic".to_string());
        let kind = AuthKind::parse(&kind_raw)
            .ok_or_else(|| format!("invalid auth type '{kind_raw}', expected basic or bearer"))?;
        request.auth = Some((kind, credential));
    }
    let timeout = args.timeout.or(cfg.timeout).unwrap_or(7.5);
    if !timeout.is_finite() || timeout <= 0.0 {
        return Err("invalid timeout, expected a positive number of seconds".to_string());
    }
    request.timeout = Duration::try_from_secs_f64(timeout)
        .map_err(|e| format!("invalid timeout '{timeout}': {e}"))?;
    request.proxy = args.proxy.or(cfg.proxy).filter(|p| !p.trim().is_empty());
    request.follow_redirects = args.follow_redirects || cfg.follow_redirects.unwrap_or(false);
    request.retries = args.retries.or(cfg.retries).unwrap_or(1);

    let mut headers: HashMap<String, String> = HashMap::new();
    if let Some(ua) = args.user_agent.or(cfg.user_agent) {
        headers.insert("User-Agent".to_string(), ua);
    }
    if let Some(cookie) = args.cookie.or(cfg.cookie) {
        headers.insert("Cookie".to_string(), cookie);
    }
    let header_lines = cfg
        .headers
        .unwrap_or_default()
        .into_iter()
        .chain(args.headers)
        .collect::<Vec<_>>()
        .join("\n");
    headers.extend(utils::parse_headers(&header_lines));

    let output = args.output.or(cfg.output).filter(|o| !o.trim().is_empty());
    let output_format = match args.output_format.or(cfg.output_format) {
        Some(raw) => Some(
            OutputFormat::parse(&raw)
                .ok_or_else(|| format!("invalid output format '{raw}', expected text or json"))?,
        ),
        None => output.as_deref().and_then(output::infer_format_from_path),
    };

    let options = Options {
        urls,
        url_file,
        stdin: args.stdin,
        cidr,
        wordlists,
        dict_dir,
        scan,
        filters,
        request,
        headers,
        header_file: args.header_file.or(cfg.header_file),
        data_file: args.data_file.or(cfg.data_file),
        view: ViewOptions {
            full_url: args.full_url || cfg.full_url.unwrap_or(false),
            redirects_history: args.redirects_history || cfg.redirects_history.unwrap_or(false),
        },
    };

    Ok(RunConfig {
        options,
        output,
        output_format,
        no_color,
        quiet,
        verbose: args.verbose,
    })
}

fn print_summary(run: &RunConfig) {
    let o = &run.options;
    let mut inputs: Vec<String> = Vec::new();
    if !o.urls.is_empty() {
        inputs.push(format!("urls={}", o.urls.len()));
    }
    if let Some(path) = o.url_file.as_ref() {
        inputs.push(format!("file={path}"));
    }
    if o.stdin {
        inputs.push("stdin".to_string());
    }
    if let Some(cidr) = o.cidr.as_ref() {
        inputs.push(format!("cidr={cidr}"));
    }
    format_kv_line("Target", &inputs.join(" "));
    format_kv_line(
        "Wordlists",
        &if o.wordlists.is_empty() {
            format!("{}/*.txt", o.dict_dir)
        } else {
            o.wordlists
                .iter()
                .map(|w| match w {
                    WordlistSource::FilePath(p) => p.clone(),
                    WordlistSource::Inline(words) => format!("inline({})", words.len()),
                })
                .collect::<Vec<_>>()
                .join(",")
        },
    );
    format_kv_line(
        "Scan",
        &format!(
            "workers={} recursion={} depth={} max_rate={} delay={}ms max_time={}",
            o.scan.workers,
            recursion_label(o.scan.recursion),
            o.scan.max_recursion_depth,
            o.scan.max_rate,
            o.scan.delay.as_millis(),
            o.scan
                .max_time
                .map(|t| format!("{}s", t.as_secs()))
                .unwrap_or_else(|| "off".to_string()),
        ),
    );
    format_kv_line(
        "HTTP",
        &format!(
            "method={} timeout={:.1}s retries={} redirects={} proxy={}",
            o.request.method,
            o.request.timeout.as_secs_f64(),
            o.request.retries,
            format_bool(o.request.follow_redirects),
            if o.request.proxy.is_some() { "on" } else { "off" },
        ),
    );
    format_kv_line(
        "Match",
        &format!(
            "include={} exclude={} skip_on={}",
            format_codes(&o.filters.include_status_codes),
            format_codes(&o.filters.exclude_status_codes),
            format_codes(&o.scan.skip_on_status),
        ),
    );
    if let Some(path) = run.output.as_ref() {
        format_kv_line("Output", path);
    }
    println!();
}

async fn run_async(run: RunConfig) -> Result<(), String> {
    if run.no_color {
        colored::control::set_override(false);
    }
    if !run.quiet {
        print_banner();
        print_summary(&run);
    }

    let runner = Runner::new(run.options.clone()).map_err(|e| e.to_string())?;

    let pb = ProgressBar::new(1);
    if run.quiet {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb.enable_steady_tick(Duration::from_millis(200));
    }
    pb.set_style(
        ProgressStyle::with_template(
            ":: Progress: [{pos}/{len}] :: {per_sec} :: Duration: [{elapsed_precise}] :: {msg}",
        )
        .map_err(|e| format!("failed to build progress bar style: {e}"))?
        .progress_chars(r#"#>-"#),
    );

    let (tx, rx) = mpsc::channel::<Command>(8);
    spawn_interrupt_handler(pb.clone(), tx, !run.options.stdin);

    let result = runner
        .run_with(pb.clone(), Some(rx))
        .await
        .map_err(|e| e.to_string());
    pb.finish_and_clear();
    let result = result?;

    if !run.quiet {
        for target in result.report.targets.iter() {
            if target.outcome != TargetOutcome::Completed {
                format_kv_line(
                    "Stopped",
                    &format!("{} ({})", target.target, outcome_label(&target.outcome)),
                );
            }
        }
    }

    if let Some(path) = run.output.as_ref() {
        let format = run.output_format.unwrap_or(OutputFormat::Text);
        runner::write_output(path, format, &result.records())
            .await
            .map_err(|e| e.to_string())?;
    }

    if !run.quiet {
        println!();
        println!(
            ":: Completed :: {} hits, {} errors, scan took {}s ::",
            result.report.hit_count(),
            result.report.error_count(),
            result.report.elapsed.as_secs()
        );
    }
    Ok(())
}

pub fn run_cli() -> Result<(), String> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp => {
                print!("{}", render_custom_help());
                return Ok(());
            }
            ErrorKind::DisplayVersion => {
                let cmd = CliArgs::command();
                print!("{}", cmd.render_version());
                return Ok(());
            }
            _ => return Err(e.to_string()),
        },
    };

    let user_config_path = args.config.clone().map(|p| config::expand_tilde(&p));
    if args.init_config {
        let path = user_config_path
            .or_else(config::default_config_path)
            .ok_or_else(|| "could not determine the home directory".to_string())?;
        config::ensure_default_config_file(&path)?;
        println!("config: {}", path.display());
        return Ok(());
    }
    let cfg = match user_config_path.as_ref() {
        Some(path) => config::load_config(path, false)?,
        None => match config::default_config_path() {
            Some(path) => config::load_config(&path, true)?,
            None => ConfigFile::default(),
        },
    };

    let run = build_run_config(args, cfg)?;
    init_logging(log_level(run.verbose, run.quiet));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build runtime: {e}"))?;

    let result = rt.block_on(run_async(run));
    // an unanswered interrupt prompt must not hold the process open
    rt.shutdown_background();
    result
}
