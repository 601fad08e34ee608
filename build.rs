// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: sweep configuration
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .default_value("toolsweep.toml")
        .help("Sweep configuration")
}

/// Common argument: interceptor stub
fn shim_arg() -> Arg {
    Arg::new("shim")
        .long("shim")
        .value_name("PATH")
        .help("Interceptor stub (default: toolsweep-shim next to toolsweep)")
}

fn build_cli() -> Command {
    Command::new("toolsweep")
        .version(env!("CARGO_PKG_VERSION"))
        .author("toolsweep contributors")
        .about("Build a package set against a toolchain and classify what breaks")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Debug logging (RUST_LOG takes precedence)"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("compile")
                .about("Compile package metadata into a build plan")
                .arg(Arg::new("metadata").short('m').long("metadata").required(true).help("Package metadata (JSON)"))
                .arg(config_arg())
                .arg(Arg::new("out").short('o').long("out").default_value("plan.json").help("Where to write the plan"))
                .arg(Arg::new("ninja").long("ninja").help("Also write a ninja build file"))
                .arg(
                    Arg::new("ninja_toolchain")
                        .long("ninja-toolchain")
                        .default_value("native")
                        .help("Toolchain name substituted into ninja commands"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Build every target of a plan with one toolchain")
                .arg(Arg::new("plan").short('p').long("plan").default_value("plan.json").help("Build plan"))
                .arg(Arg::new("toolchain").short('t').long("toolchain").required(true).help("Toolchain description"))
                .arg(config_arg())
                .arg(Arg::new("jobs").short('j').long("jobs").help("Builds in flight"))
                .arg(shim_arg())
                .arg(
                    Arg::new("keep_envs")
                        .long("keep-envs")
                        .action(ArgAction::SetTrue)
                        .help("Keep per-task environment directories"),
                ),
        )
        .subcommand(
            Command::new("redirect")
                .about("Write one interceptor per redirect rule of a toolchain")
                .arg(Arg::new("toolchain").short('t').long("toolchain").required(true).help("Toolchain description"))
                .arg(Arg::new("out").short('o').long("out").required(true).help("Output directory"))
                .arg(shim_arg())
                .arg(
                    Arg::new("audit_dir")
                        .long("audit-dir")
                        .default_value("/tmp")
                        .help("Where interceptors record invocations"),
                ),
        )
        .subcommand(
            Command::new("classify")
                .about("Re-classify stored build results")
                .arg(Arg::new("results_dir").required(true).help("Directory of result files"))
                .arg(Arg::new("patterns").short('p').long("patterns").help("Error pattern file")),
        )
        .subcommand(
            Command::new("summary")
                .about("Summarize stored build results")
                .arg(Arg::new("results_dir").required(true).help("Directory of result files")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("toolsweep.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
