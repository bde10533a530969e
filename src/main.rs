fn main() {
    if let Err(err) = reaction_poll::run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
