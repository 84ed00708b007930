fn main() {
    if let Err(err) = record_migrate::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
