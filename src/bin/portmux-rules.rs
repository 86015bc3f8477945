use std::path::PathBuf;

use clap::{Parser, Subcommand};
use portmux::rules::{RawDocument, RouteRule, RuleEntry, RuleKind, RuleSet};
use portmux::settings::default_rules_path;

#[derive(Parser)]
#[command(name = "portmux-rules")]
#[command(about = "portmux 규칙 파일 편집 도구", long_about = None)]
struct Cli {
    /// 규칙 파일 경로 (기본값: PROXY_RULES_FILE 또는 실행 파일 옆의 proxies.json)
    #[arg(short, long, env = "PROXY_RULES_FILE")]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 규칙과 허용 포트 출력
    List,
    /// 규칙 추가 (같은 키가 있으면 거부)
    Add {
        /// path, subdomain, domain, tcp
        kind: RuleKind,
        key: String,
        target: String,
        /// 이 포트에서만 적용
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,
    },
    /// 규칙 삭제
    Remove { kind: RuleKind, key: String },
    /// 허용 포트 관리
    Port {
        #[command(subcommand)]
        action: PortAction,
    },
}

#[derive(Subcommand)]
enum PortAction {
    Add {
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },
    Remove {
        #[arg(value_parser = clap::value_parser!(u16).range(1..))]
        port: u16,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let path = cli.file.unwrap_or_else(default_rules_path);
    let mut document = RawDocument::read_or_default(&path)?;

    match cli.command {
        Commands::List => {
            print_rules(&RuleSet::from_document(&document));
            return Ok(());
        }
        Commands::Add { kind, key, target, port } => {
            let entry = RuleEntry { target, port };
            // 프록시가 건너뛸 항목은 처음부터 쓰지 않는다
            if RouteRule::from_entry(kind, &key, entry.clone())?.is_none() {
                return Err("대상이 비어 있습니다".into());
            }
            if !document.insert_rule(kind, &key, entry)? {
                return Err(format!("{} 규칙 '{}'이 이미 있습니다", kind, key).into());
            }
            println!("{} 규칙 '{}' 추가", kind, key);
        }
        Commands::Remove { kind, key } => {
            if !document.remove_rule(kind, &key) {
                return Err(format!("{} 규칙 '{}'이 없습니다", kind, key).into());
            }
            println!("{} 규칙 '{}' 삭제", kind, key);
        }
        Commands::Port { action: PortAction::Add { port } } => {
            if !document.add_port(port) {
                println!("포트 {}는 이미 허용되어 있습니다", port);
                return Ok(());
            }
            println!("포트 {} 허용", port);
        }
        Commands::Port { action: PortAction::Remove { port } } => {
            if !document.remove_port(port) {
                return Err(format!("포트 {}는 허용 목록에 없습니다", port).into());
            }
            println!("포트 {} 제거", port);
        }
    }

    document.write(&path)?;
    Ok(())
}

fn print_rules(rule_set: &RuleSet) {
    for rule in rule_set.all_rules() {
        match rule.explicit_port {
            Some(port) => println!("{:<10} {:<24} -> {} (port {})", rule.kind.as_str(), rule.key, rule.target, port),
            None => println!("{:<10} {:<24} -> {}", rule.kind.as_str(), rule.key, rule.target),
        }
    }

    let ports: Vec<String> = rule_set.allowed_ports().iter().map(u16::to_string).collect();
    println!("allowed_ports: [{}]", ports.join(", "));
}
