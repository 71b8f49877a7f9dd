fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match phpdesk_core::runtime::parse_cli_args(&args) {
        Ok(options) => options,
        Err(error) => {
            eprintln!("[phpdesk-core] {error}");
            std::process::exit(2);
        }
    };

    match phpdesk_core::runtime::run_with_options(options) {
        Ok(response) => println!("{response}"),
        Err(error) => {
            eprintln!("[phpdesk-core] runtime failed: {error}");
            std::process::exit(1);
        }
    }
}
