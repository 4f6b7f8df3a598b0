fn main() {
    if let Err(err) = csv_convert::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
