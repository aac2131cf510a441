fn main() {
    if let Err(e) = hidir::app::run_cli() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
