use crate::cli::args::CliArgs;

/// Shape checks on raw flags that are not repeated once the config file is
/// merged in. Value lists, regexes, sizes, timeouts and enums are parsed
/// (and rejected) by `app::build_run_config`.
pub fn validate(args: &CliArgs) -> Result<(), String> {
    for header in args.headers.iter() {
        match header.split_once(':') {
            Some((key, _)) if !key.trim().is_empty() => {}
            _ => return Err(format!("invalid --header '{header}', expected \"Key: Value\"")),
        }
    }
    Ok(())
}
