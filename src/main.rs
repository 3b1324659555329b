fn main() {
    let code = gomodcmd::run_cli();
    if code != 0 {
        std::process::exit(code);
    }
}
