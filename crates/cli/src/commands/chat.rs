//! `grimoire chat` — Talk to an NPC.

use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{CmdResult, build_agent, load_config, provider};

pub async fn run(
    config: Option<&Path>,
    agent: Option<&str>,
    stream: bool,
    instructions: Option<&Path>,
) -> CmdResult {
    let config = load_config(config)?;
    let mut npc = build_agent(&config, provider(&config), agent, true).await?;
    if let Some(path) = instructions {
        npc.set_system_instructions_from_file(path).await?;
    }

    println!();
    println!("  Agent:   {}", npc.name());
    println!("  Model:   {}", config.models.chat);
    println!("  Engine:  {}", config.engine.base_url);
    println!();
    println!("  Type your message and press Enter.");
    println!("  /history shows the conversation, /reset clears it, /bye quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "/bye" => break,
            "/history" => {
                print!("{}", npc.transcript());
                continue;
            }
            "/reset" => {
                npc.reset_messages();
                println!("  (history cleared)");
                continue;
            }
            _ => {}
        }

        println!();
        let outcome = if stream {
            print!("  {} > ", npc.name());
            std::io::stdout().flush()?;
            let answer = npc
                .stream_completion_with_similarity_search(input, |chunk| {
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                })
                .await;
            println!();
            answer.map(|_| ())
        } else {
            npc.completion_with_similarity_search(input)
                .await
                .map(|answer| {
                    for line in answer.trim().lines() {
                        println!("  {} > {line}", npc.name());
                    }
                })
        };

        if let Err(e) = outcome {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Farewell, adventurer!");
    println!();
    Ok(())
}
