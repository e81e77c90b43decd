use super::*;

fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
    Cli::try_parse_from(std::iter::once("vasm").chain(args.iter().copied()))
}

#[test]
fn run_defaults() {
    let cli = parse(&["run", "demos/sum_even.vasm"]).unwrap();
    assert_eq!(cli.verbose, 0);
    assert_eq!(cli.memory, MemoryPreset::Standard);
    let Command::Run(args) = cli.command else {
        panic!("expected run");
    };
    assert_eq!(args.file, PathBuf::from("demos/sum_even.vasm"));
    assert!(!args.debug);
    assert_eq!(args.time, 1);
}

#[test]
fn run_flags() {
    let cli = parse(&["-vv", "run", "a.vasm", "--debug", "--time", "5", "--memory", "small"]).unwrap();
    assert_eq!(cli.verbose, 2);
    assert_eq!(cli.memory, MemoryPreset::Small);
    let Command::Run(args) = cli.command else {
        panic!("expected run");
    };
    assert!(args.debug);
    assert_eq!(args.time, 5);
}

#[test]
fn time_must_be_positive() {
    assert!(parse(&["run", "a.vasm", "--time", "0"]).is_err());
    assert!(parse(&["run", "a.vasm", "--time", "-3"]).is_err());
}

#[test]
fn emit_needs_output() {
    assert!(parse(&["emit", "a.vasm"]).is_err());
    let cli = parse(&["emit", "a.vasm", "a.vbc"]).unwrap();
    let Command::Emit(args) = cli.command else {
        panic!("expected emit");
    };
    assert_eq!(args.output, PathBuf::from("a.vbc"));
}

#[test]
fn check_and_load() {
    assert!(matches!(
        parse(&["check", "a.vasm", "-d"]).unwrap().command,
        Command::Check(CheckArgs { debug: true, .. })
    ));
    assert!(matches!(
        parse(&["load", "a.vbc", "--memory", "large"]),
        Ok(Cli {
            memory: MemoryPreset::Large,
            command: Command::Load(_),
            ..
        })
    ));
}

#[test]
fn rejects_unknown_input() {
    assert!(parse(&[]).is_err());
    assert!(parse(&["frobnicate"]).is_err());
    assert!(parse(&["run", "a.vasm", "--memory", "huge"]).is_err());
}
