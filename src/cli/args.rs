use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "hidir",
    version,
    about = "web path scanner",
    long_about = "hidir brute forces hidden directories and files on web servers.\n\nExamples:\n  hidir -u https://target.tld/\n  hidir -u https://target.tld/ -w ./dict/common.txt -t 50 -r\n  hidir -l targets.txt -x 404,500-599 -o hits.json\n\nTip: Use --config to persist scan settings and keep CLI invocations short."
)]
pub struct CliArgs {
    #[arg(
        short = 'u',
        long = "url",
        value_name = "URL",
        action = ArgAction::Append,
        help_heading = "Input",
        help = "Target URL (repeatable)."
    )]
    pub url: Vec<String>,

    #[arg(
        short = 'l',
        long = "url-file",
        visible_alias = "urls-file",
        value_name = "FILE",
        help_heading = "Input",
        help = "Load target URLs from a file (one per line)."
    )]
    pub url_file: Option<String>,

    #[arg(
        long = "stdin",
        help_heading = "Input",
        help = "Read target URLs from standard input."
    )]
    pub stdin: bool,

    #[arg(
        long = "cidr",
        value_name = "CIDR",
        help_heading = "Input",
        help = "Scan every host of a network range, e.g. 10.0.0.0/24."
    )]
    pub cidr: Option<String>,

    #[arg(
        short = 'C',
        long = "config",
        value_name = "FILE",
        help_heading = "Input",
        help = "Path to config file (defaults to ~/.hidir/config.yml)."
    )]
    pub config: Option<String>,

    #[arg(
        long = "init-config",
        help_heading = "Input",
        help = "Write a default config file (if missing) and exit."
    )]
    pub init_config: bool,

    #[arg(
        short = 'w',
        long = "wordlists",
        value_name = "FILES",
        action = ArgAction::Append,
        value_delimiter = ',',
        help_heading = "Dictionary",
        help = "Wordlist files (comma-separated or repeatable)."
    )]
    pub wordlists: Vec<String>,

    #[arg(
        long = "dict-dir",
        value_name = "DIR",
        help_heading = "Dictionary",
        help = "Directory whose *.txt files are used when no wordlist is given (default ./dict)."
    )]
    pub dict_dir: Option<String>,

    #[arg(
        short = 't',
        long = "threads",
        visible_alias = "workers",
        value_name = "N",
        help_heading = "General",
        help = "Number of concurrent workers."
    )]
    pub workers: Option<usize>,

    #[arg(
        short = 'r',
        long = "recursive",
        help_heading = "General",
        help = "Scan discovered directories recursively."
    )]
    pub recursive: bool,

    #[arg(
        long = "deep-recursive",
        help_heading = "General",
        help = "Recursive scan that also queues every parent of a hit (a/b/c -> a/, a/b/)."
    )]
    pub deep_recursive: bool,

    #[arg(
        long = "force-recursive",
        help_heading = "General",
        help = "Recurse into every hit regardless of --recursion-status."
    )]
    pub force_recursive: bool,

    #[arg(
        short = 'R',
        long = "max-recursion-depth",
        value_name = "DEPTH",
        help_heading = "General",
        help = "Maximum recursion depth (0 = unlimited)."
    )]
    pub max_recursion_depth: Option<usize>,

    #[arg(
        long = "recursion-status",
        value_name = "CODES",
        help_heading = "General",
        help = "Hits with these status codes are scanned recursively (comma-separated, ranges allowed)."
    )]
    pub recursion_status: Option<String>,

    #[arg(
        long = "subdirs",
        value_name = "DIRS",
        help_heading = "General",
        help = "Scan these sub-directories of each target instead of its root (comma-separated)."
    )]
    pub subdirs: Option<String>,

    #[arg(
        long = "exclude-subdirs",
        value_name = "DIRS",
        help_heading = "General",
        help = "Never scan directories containing these paths (comma-separated)."
    )]
    pub exclude_subdirs: Option<String>,

    #[arg(
        short = 'i',
        long = "include-status",
        value_name = "CODES",
        help_heading = "General",
        help = "Only these status codes are hits (comma-separated, ranges allowed)."
    )]
    pub include_status: Option<String>,

    #[arg(
        short = 'x',
        long = "exclude-status",
        value_name = "CODES",
        help_heading = "General",
        help = "These status codes are never hits (comma-separated, ranges allowed)."
    )]
    pub exclude_status: Option<String>,

    #[arg(
        long = "exclude-sizes",
        value_name = "BYTES",
        help_heading = "General",
        help = "Responses with these exact sizes are never hits (comma-separated)."
    )]
    pub exclude_sizes: Option<String>,

    #[arg(
        long = "exclude-text",
        value_name = "TEXT",
        action = ArgAction::Append,
        help_heading = "General",
        help = "Responses whose body contains this text are never hits (repeatable)."
    )]
    pub exclude_texts: Vec<String>,

    #[arg(
        long = "exclude-regex",
        value_name = "REGEX",
        help_heading = "General",
        help = "Responses whose body matches this regex are never hits."
    )]
    pub exclude_regex: Option<String>,

    #[arg(
        long = "exclude-redirect",
        value_name = "REGEX",
        help_heading = "General",
        help = "Redirects whose target matches this regex are never hits."
    )]
    pub exclude_redirect: Option<String>,

    #[arg(
        long = "min-response-size",
        value_name = "BYTES",
        help_heading = "General",
        help = "Minimum response size for a hit."
    )]
    pub min_response_size: Option<usize>,

    #[arg(
        long = "max-response-size",
        value_name = "BYTES",
        help_heading = "General",
        help = "Maximum response size for a hit (0 = unlimited)."
    )]
    pub max_response_size: Option<usize>,

    #[arg(
        long = "skip-on-status",
        value_name = "CODES",
        help_heading = "General",
        help = "Skip the current target when one of these status codes is seen."
    )]
    pub skip_on_status: Option<String>,

    #[arg(
        long = "max-time",
        value_name = "SECONDS",
        help_heading = "General",
        help = "Maximum run time in seconds (0 = unlimited)."
    )]
    pub max_time: Option<u64>,

    #[arg(
        long = "max-errors",
        value_name = "N",
        help_heading = "General",
        help = "Skip a target after more than N consecutive request errors (default 5)."
    )]
    pub max_errors: Option<usize>,

    #[arg(
        long = "exit-on-error",
        help_heading = "General",
        help = "Abort the whole run on the first request error."
    )]
    pub exit_on_error: bool,

    #[arg(
        short = 'm',
        long = "http-method",
        visible_alias = "method",
        value_name = "METHOD",
        help_heading = "Request",
        help = "HTTP method (default GET)."
    )]
    pub method: Option<String>,

    #[arg(
        short = 'd',
        long = "data",
        value_name = "DATA",
        help_heading = "Request",
        help = "Request body."
    )]
    pub data: Option<String>,

    #[arg(
        long = "data-file",
        value_name = "FILE",
        help_heading = "Request",
        help = "Read the request body from a file."
    )]
    pub data_file: Option<String>,

    #[arg(
        short = 'H',
        long = "header",
        value_name = "HEADER",
        action = ArgAction::Append,
        help_heading = "Request",
        help = "Custom header \"Key: Value\" (repeatable)."
    )]
    pub headers: Vec<String>,

    #[arg(
        long = "header-file",
        value_name = "FILE",
        help_heading = "Request",
        help = "Read headers from a file (one \"Key: Value\" per line)."
    )]
    pub header_file: Option<String>,

    #[arg(
        long = "user-agent",
        value_name = "UA",
        help_heading = "Request",
        help = "User-Agent header."
    )]
    pub user_agent: Option<String>,

    #[arg(
        long = "cookie",
        value_name = "COOKIE",
        help_heading = "Request",
        help = "Cookie header."
    )]
    pub cookie: Option<String>,

    #[arg(
        long = "auth",
        value_name = "CREDENTIAL",
        help_heading = "Request",
        help = "Credential, user:pass for basic or a token for bearer."
    )]
    pub auth: Option<String>,

    #[arg(
        long = "auth-type",
        value_name = "TYPE",
        help_heading = "Request",
        help = "Authentication type: basic or bearer (default basic)."
    )]
    pub auth_type: Option<String>,

    #[arg(
        short = 'F',
        long = "follow-redirects",
        help_heading = "Request",
        help = "Follow HTTP redirects (up to 10 hops)."
    )]
    pub follow_redirects: bool,

    #[arg(
        long = "timeout",
        value_name = "SECONDS",
        help_heading = "Connection",
        help = "Request timeout in seconds (default 7.5)."
    )]
    pub timeout: Option<f64>,

    #[arg(
        long = "delay",
        value_name = "MS",
        help_heading = "Connection",
        help = "Per-worker delay between requests in milliseconds."
    )]
    pub delay: Option<u64>,

    #[arg(
        long = "max-rate",
        value_name = "RPS",
        help_heading = "Connection",
        help = "Global request rate limit in requests per second (0 = unlimited)."
    )]
    pub max_rate: Option<u32>,

    #[arg(
        long = "retries",
        value_name = "N",
        help_heading = "Connection",
        help = "Retries for requests that failed at the transport level (default 1)."
    )]
    pub retries: Option<usize>,

    #[arg(
        short = 'p',
        long = "proxy",
        value_name = "URL",
        help_heading = "Connection",
        help = "Proxy for every request, e.g. http://127.0.0.1:8080."
    )]
    pub proxy: Option<String>,

    #[arg(
        long = "replay-proxy",
        value_name = "URL",
        help_heading = "Connection",
        help = "Re-send every hit through this proxy."
    )]
    pub replay_proxy: Option<String>,

    #[arg(
        long = "full-url",
        help_heading = "View",
        help = "Print full URLs instead of paths."
    )]
    pub full_url: bool,

    #[arg(
        long = "redirects-history",
        help_heading = "View",
        help = "Print every redirect hop of a hit."
    )]
    pub redirects_history: bool,

    #[arg(
        long = "no-color",
        help_heading = "View",
        help = "Disable colored output."
    )]
    pub no_color: bool,

    #[arg(
        short = 'q',
        long = "quiet",
        help_heading = "View",
        help = "Print hits only: no banner, no summary, errors-only logging."
    )]
    pub quiet: bool,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help_heading = "View",
        help = "Increase log verbosity (-v, -vv)."
    )]
    pub verbose: u8,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        help_heading = "Output",
        help = "Write hits to a file."
    )]
    pub output: Option<String>,

    #[arg(
        long = "format",
        visible_alias = "output-format",
        value_name = "FORMAT",
        help_heading = "Output",
        help = "Output format: text or json (inferred from the file extension)."
    )]
    pub output_format: Option<String>,
}
