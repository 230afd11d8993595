fn main() {
    if let Err(e) = oraprov::run_cli() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
}
