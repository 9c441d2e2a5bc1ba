use std::path::PathBuf;
use tinplayer::app::StartupOptions;
use tinplayer::config::InputMode;

fn main() -> anyhow::Result<()> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    tinplayer::app::run(options)
}

fn parse_args(args: Vec<String>) -> anyhow::Result<StartupOptions> {
    let mut out = StartupOptions::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--music" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--music requires a directory");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--music cannot be empty");
                }
                out.music_dir = Some(PathBuf::from(value));
            }
            "--gpio" => out.input = Some(InputMode::Gpio),
            "--keyboard" => out.input = Some(InputMode::Keyboard),
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("tinplayer");
    println!("  --music <dir>     Library root (overrides settings.json)");
    println!("  --gpio            Read buttons from sysfs GPIO lines");
    println!("  --keyboard        Emulate buttons: a s d f press, A S D F hold, q quits");
}
