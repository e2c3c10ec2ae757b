use super::{join_words, Command, CommandContext};
use crate::identity::{BROADCAST_TARGET, USER_AGENT_ID};
use crate::protocol::MessageKind;
use anyhow::Result;

pub struct InboxCommand {
    pub ctx: CommandContext,
}

impl Command for InboxCommand {
    async fn execute(&self) -> Result<()> {
        let mut client = self.ctx.connect().await?;
        let messages = client.poll_inbox().await?;
        client.disconnect();

        if messages.is_empty() {
            println!("📭 No new messages for {}", self.ctx.agent_id);
            return Ok(());
        }

        println!("📬 {} new message(s) for {}", messages.len(), self.ctx.agent_id);
        println!();
        for message in &messages {
            println!(
                "{} #{} from {} [{}] {}",
                kind_emoji(message.kind),
                message.id,
                message.from,
                message.kind,
                message.timestamp.format("%H:%M:%S")
            );
            for line in message.content.lines() {
                println!("   {line}");
            }
        }
        println!();
        println!("💡 Answer with 'subagent reply <agent-id> <message>'");
        Ok(())
    }
}

fn kind_emoji(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Question => "❓",
        MessageKind::Complete => "✅",
        MessageKind::Blocked => "🚧",
        MessageKind::Status => "📊",
        MessageKind::Discovery => "💡",
        MessageKind::Guidance => "🧭",
        MessageKind::Clarification => "💬",
        MessageKind::Broadcast => "📣",
    }
}

/// `send`, `reply`, `broadcast` and `notify` differ only in target and type
pub struct SendCommand {
    pub ctx: CommandContext,
    pub to: String,
    pub kind: MessageKind,
    pub words: Vec<String>,
}

impl SendCommand {
    pub fn send(ctx: CommandContext, to: String, words: Vec<String>) -> Self {
        Self { ctx, to, kind: MessageKind::Guidance, words }
    }

    pub fn reply(ctx: CommandContext, to: String, words: Vec<String>) -> Self {
        Self { ctx, to, kind: MessageKind::Clarification, words }
    }

    pub fn broadcast(ctx: CommandContext, words: Vec<String>) -> Self {
        Self {
            ctx,
            to: BROADCAST_TARGET.to_string(),
            kind: MessageKind::Broadcast,
            words,
        }
    }

    pub fn notify(ctx: CommandContext, kind: MessageKind, words: Vec<String>) -> Self {
        Self {
            ctx,
            to: USER_AGENT_ID.to_string(),
            kind,
            words,
        }
    }
}

impl Command for SendCommand {
    async fn execute(&self) -> Result<()> {
        let content = join_words(&self.words);
        let mut client = self.ctx.connect_or_start().await?;
        let result = client.send_message(&self.to, self.kind, &content).await;
        client.disconnect();

        match result {
            Ok(receipt) if self.to == BROADCAST_TARGET => {
                println!(
                    "📣 Broadcast #{} delivered to {} mailbox(es)",
                    receipt.message_id, receipt.delivered_to
                );
                Ok(())
            }
            Ok(receipt) => {
                println!("📨 Sent #{} ({}) to {}", receipt.message_id, self.kind, self.to);
                Ok(())
            }
            Err(e) => {
                println!("❌ Message not sent: {e}");
                Err(e.into())
            }
        }
    }
}
