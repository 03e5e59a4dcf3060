use anyhow::Result;

fn main() -> Result<()> {
    history_sanitizer::run_cli()
}
