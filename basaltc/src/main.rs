use std::{env, fs};

use basalt_codegen::exprgen::generate;
use basalt_codegen::service::analyze_listing;
use basalt_pcode::parse_stream;

// Map aliases → canonical commands
fn canonicalize(cmd: &str) -> &str {
    match cmd.to_ascii_lowercase().as_str() {
        "gen" => "gen",
        "check" => "check",
        // aliases
        "emit" => "gen",
        "lint" => "check",
        _ => cmd,
    }
}

fn print_help() {
    println!("Basalt backend CLI (prototype)\n");
    println!("Commands (aliases in parentheses):");
    println!("  gen (emit)     Generate pseudo-code from a linearized token stream");
    println!("  check (lint)   Analyze a pseudo-code listing, print diagnostics as JSON\n");
    println!("Usage:");
    println!("  basaltc <command> <file>\n");
    println!("Examples:");
    println!("  basaltc gen demos/sum.bex");
    println!("  basaltc check demos/sum.pc");
    println!("\nToken stream files hold one token per line: ':' prefixes an operator,");
    println!("'_' marks a reduce, ';' starts a comment, anything else is an operand.");
}

fn cmd_gen(path: Option<String>) {
    let Some(path) = path else {
        eprintln!("usage: basaltc gen <file.bex>");
        std::process::exit(2)
    };
    let src = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => { eprintln!("error: {}: {}", path, e); std::process::exit(1); }
    };
    let stream = parse_stream(&src);
    log::debug!("parsed {} token(s) from {}", stream.len(), path);
    match generate(&stream, &[]) {
        Ok(code) => {
            for line in code { println!("{}", line); }
        }
        Err(e) => { eprintln!("error: {}", e); std::process::exit(1); }
    }
}

fn cmd_check(path: Option<String>) {
    let Some(path) = path else {
        eprintln!("usage: basaltc check <file.pc>");
        std::process::exit(2)
    };
    let src = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => { eprintln!("error: {}: {}", path, e); std::process::exit(1); }
    };
    let diags = analyze_listing(&src);
    match serde_json::to_string_pretty(&diags) {
        Ok(json) => println!("{}", json),
        Err(e) => { eprintln!("error: {}", e); std::process::exit(1); }
    }
    if !diags.errors.is_empty() { std::process::exit(1); }
}

fn main() {
    env_logger::init();
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args[0] == "-h" || args[0] == "--help" || args[0] == "help" {
        print_help();
        return;
    }
    let cmd = args.remove(0);
    match canonicalize(&cmd) {
        "gen" => cmd_gen(args.into_iter().next()),
        "check" => cmd_check(args.into_iter().next()),
        other => {
            eprintln!("error: unknown command '{}'. Try 'basaltc help'.", other);
            std::process::exit(2);
        }
    }
}
