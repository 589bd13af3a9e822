fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match toolhub::cli::run(args) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
