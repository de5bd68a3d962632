use std::env;
use std::process;

use domain::adapters::memory_repo::InMemoryStore;
use domain::service::LinkService;
use domain::shortcode::RandomCodeGenerator;
use domain::{ClickInput, Code, CoreError, ShortenRequest, SystemClock};

fn print_usage() {
    eprintln!(
        "{}\n\nUsage:\n  domain create <url> [--alias <custom>] [--visit <ip>]...\n  domain resolve <code>\n\nNotes:\n  - This demo CLI uses an in-memory store; data is not persisted across runs.",
        domain::about()
    );
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1); // skip program name

    let Some(cmd) = args.next() else {
        print_usage();
        return Ok(());
    };

    // Construct a demo service with in-memory storage
    let svc = LinkService::new(InMemoryStore::new(), RandomCodeGenerator, SystemClock);

    match cmd.as_str() {
        "create" => {
            let Some(url) = args.next() else {
                return Err("missing <url> for create".into());
            };

            let mut custom_alias: Option<String> = None;
            let mut visits: Vec<String> = Vec::new();

            // Parse simple flags: --alias <val>, --visit <ip>
            let rest: Vec<String> = args.collect();
            let mut i = 0;
            while i < rest.len() {
                match rest[i].as_str() {
                    "--alias" => {
                        if i + 1 >= rest.len() {
                            return Err("--alias requires a value".into());
                        }
                        custom_alias = Some(rest[i + 1].clone());
                        i += 2;
                    }
                    "--visit" => {
                        if i + 1 >= rest.len() {
                            return Err("--visit requires an ip".into());
                        }
                        visits.push(rest[i + 1].clone());
                        i += 2;
                    }
                    unk => {
                        return Err(format!("unknown argument: {}", unk));
                    }
                }
            }

            let input = ShortenRequest {
                original_url: url,
                custom_alias,
                expires_at: None,
            };
            let link = svc
                .create(input)
                .map_err(|e| format!("create failed: {}", e))?;
            println!("created: {} -> {}", link.code, link.original_url);

            for ip in visits {
                let click = ClickInput {
                    ip,
                    country: String::new(),
                    user_agent: "domain-cli".into(),
                };
                svc.record_visit(&link.code, click)
                    .map_err(|e| format!("visit failed: {}", e))?;
            }
            let details = svc
                .details(&link.code, "http://localhost:8080")
                .map_err(|e| format!("details failed: {}", e))?;
            println!(
                "{}: {} clicks, {} unique visitors",
                details.short_url, details.total_clicks, details.unique_visitors
            );
            Ok(())
        }
        "resolve" => {
            let Some(code_str) = args.next() else {
                return Err("missing <code> for resolve".into());
            };
            let code = Code::new(code_str).map_err(|e| format!("invalid code: {}", e))?;
            match svc.lookup(&code) {
                Ok(link) => {
                    println!("{}", link.original_url);
                    Ok(())
                }
                Err(CoreError::NotFound) => Err("not found".into()),
                Err(e) => Err(format!("resolve failed: {}", e)),
            }
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn main() {
    if let Err(msg) = run() {
        eprintln!("error: {}", msg);
        process::exit(1);
    }
}
