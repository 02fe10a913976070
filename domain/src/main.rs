use std::env;
use std::process;
use std::time::SystemTime;

use domain::engine::ResolutionEngine;
use domain::{
    ClickContext, Conditions, Constraint, LinkConfig, LinkId, LinkStatus, Target, UtmConditions,
    UtmParams,
};

fn print_usage() {
    eprintln!(
        "{}\n\nUsage:\n  domain resolve [--country <cc>] [--lang <ll>] [--device <kind>] [--utm-source <v>] [--utm-campaign <v>]\n\nNotes:\n  - This demo CLI resolves against a built-in sample configuration; nothing is persisted.",
        domain::about()
    );
}

/// A small built-in configuration so the engine can be exercised without
/// any storage: country+device+utm, utm-only, country-only, and a
/// catch-all default.
fn sample_config() -> LinkConfig {
    let mut de_tiktok = Target::new("de_tiktok_mobile", "https://example.com/de/tiktok");
    de_tiktok.priority = Some(10);
    de_tiktok.conditions = Some(Conditions {
        country: Some(Constraint::One("DE".into())),
        device: Some(Constraint::One("mobile".into())),
        utm: Some(UtmConditions {
            source: Some(Constraint::One("tiktok".into())),
            ..UtmConditions::default()
        }),
        ..Conditions::default()
    });

    let mut email = Target::new("email_campaign", "https://example.com/email");
    email.priority = Some(20);
    email.conditions = Some(Conditions {
        utm: Some(UtmConditions {
            source: Some(Constraint::One("email".into())),
            campaign: Some(Constraint::One("spring_2026".into())),
            ..UtmConditions::default()
        }),
        ..Conditions::default()
    });

    let mut de = Target::new("de_default", "https://example.com/de");
    de.priority = Some(30);
    de.conditions = Some(Conditions {
        country: Some(Constraint::One("DE".into())),
        ..Conditions::default()
    });

    let mut fallback = Target::new("global_fallback", "https://example.com/");
    fallback.priority = Some(100);

    LinkConfig {
        link_id: LinkId::new("spring_sale_2026").expect("static id is valid"),
        name: Some("Spring Sale 2026".into()),
        description: None,
        status: LinkStatus::Active,
        targets: vec![de_tiktok, email, de, fallback],
        default_target_id: "global_fallback".into(),
        valid_from: None,
        valid_until: None,
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1); // skip program name

    let Some(cmd) = args.next() else {
        print_usage();
        return Ok(());
    };

    match cmd.as_str() {
        "resolve" => {
            let mut context = ClickContext {
                country: None,
                language: None,
                device: None,
                utm: UtmParams::default(),
                timestamp: SystemTime::now(),
            };

            // Parse simple flags: each takes one value.
            let rest: Vec<String> = args.collect();
            let mut i = 0;
            while i < rest.len() {
                let flag = rest[i].as_str();
                if i + 1 >= rest.len() {
                    return Err(format!("{} requires a value", flag));
                }
                let val = rest[i + 1].clone();
                match flag {
                    "--country" => context.country = Some(val),
                    "--lang" => context.language = Some(val),
                    "--device" => context.device = Some(val),
                    "--utm-source" => context.utm.source = Some(val),
                    "--utm-campaign" => context.utm.campaign = Some(val),
                    unk => return Err(format!("unknown argument: {}", unk)),
                }
                i += 2;
            }

            let engine = ResolutionEngine::new();
            let decision = engine.resolve(&sample_config(), &context, None);

            println!("outcome:  {}", decision.outcome.as_str());
            println!("reason:   {}", decision.reason);
            match (&decision.target_id, &decision.resolved_url) {
                (Some(id), Some(url)) => {
                    println!("target:   {}", id);
                    println!("url:      {}", url);
                }
                _ => println!("target:   (none)"),
            }
            println!("latency:  {:?}", decision.latency);
            Ok(())
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
