use async_trait::async_trait;
use steward_core::User;
use tracing::{debug, warn};

use crate::context::{Quote, RouteContext};
use crate::pipeline::{Flow, Stage};

const QUOTE_PREFIX: &str = "「";
const QUOTE_SUFFIX: &str = "」\n- - - - - - - - - - - - - - -\n";
const AUTHOR_SEPARATOR: char = '：';

/// Splits `「quoted」\n- - - ...\nbody` into `(quoted, body)`.
pub fn split_quote(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix(QUOTE_PREFIX)?;
    let (quoted, body) = rest.split_once(QUOTE_SUFFIX)?;
    Some((quoted, body))
}

/// Strips `"<name>："` from `quoted` for the first matching name of `user`.
fn strip_author<'a>(quoted: &'a str, user: &User) -> Option<&'a str> {
    user.name_candidates().find_map(|name| {
        quoted
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix(AUTHOR_SEPARATOR))
            .map(str::trim)
    })
}

/// Parses a leading quote and attributes it to a group member.
///
/// The mentioned member is tried first, then every member of the group.
/// Quotes that cannot be attributed are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuoteStage;

#[async_trait]
impl Stage for QuoteStage {
    fn name(&self) -> &'static str {
        "quote"
    }

    async fn run(&self, ctx: &RouteContext) -> Flow {
        let msg = ctx.message();
        if msg.is_system || !msg.is_text() || msg.group.is_none() {
            return Flow::Continue;
        }
        let Some((quoted, body)) = split_quote(&msg.content) else {
            return Flow::Continue;
        };

        let members = match ctx.transport().members(msg.gid()).await {
            Ok(members) => members,
            Err(e) => {
                warn!(gid = %msg.gid(), error = %e, "Failed to list members for quote");
                return Flow::Continue;
            }
        };

        let mentioned = msg
            .at_target
            .as_deref()
            .and_then(|uid| members.iter().find(|m| m.uid == uid));
        let resolved = mentioned
            .and_then(|user| strip_author(quoted, user).map(|snippet| (user, snippet)))
            .or_else(|| {
                members
                    .iter()
                    .find_map(|user| strip_author(quoted, user).map(|snippet| (user, snippet)))
            });

        match resolved {
            Some((author, snippet)) => {
                debug!(author = %author.uid, "Quote attributed");
                ctx.set_state(Quote {
                    body: body.to_string(),
                    snippet: snippet.to_string(),
                    author: author.clone(),
                });
            }
            None => debug!("Quote author not found"),
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use steward_core::{Group, InboundMessage};

    fn quoted(author: &str, snippet: &str, body: &str) -> String {
        format!("{QUOTE_PREFIX}{author}{AUTHOR_SEPARATOR}{snippet}{QUOTE_SUFFIX}{body}")
    }

    async fn run(members: Vec<User>, msg: InboundMessage) -> Option<Quote> {
        let transport = MockTransport::new(User::new("bot", "bot"))
            .with_members("g", members)
            .into_arc();
        let ctx = RouteContext::new(msg, transport);
        assert_eq!(QuoteStage.run(&ctx).await, Flow::Continue);
        ctx.quote()
    }

    fn message(content: String) -> InboundMessage {
        InboundMessage::text("m", User::new("u", "n"), Group::new("g", "G"), content)
    }

    #[test]
    fn test_split_quote() {
        let text = quoted("张三", "#天气 北京", "看看");
        assert_eq!(split_quote(&text), Some(("张三：#天气 北京", "看看")));
        assert_eq!(split_quote("「不完整」"), None);
        assert_eq!(split_quote("plain"), None);
    }

    #[tokio::test]
    async fn test_resolves_by_remark_then_display_then_nickname() {
        let alice = User::new("a", "alice-nick").with_display_name("Alice");
        let bob = User::new("b", "bob").with_remark_name("老王");

        let quote = run(
            vec![alice.clone(), bob.clone()],
            message(quoted("老王", "#天气 北京", "")),
        )
        .await
        .unwrap();
        assert_eq!(quote.author, bob);
        assert_eq!(quote.snippet, "#天气 北京");
        assert_eq!(quote.body, "");

        let quote = run(vec![alice.clone(), bob], message(quoted("Alice", "hi", "body")))
            .await
            .unwrap();
        assert_eq!(quote.author, alice);
    }

    #[tokio::test]
    async fn test_mentioned_member_wins() {
        let first = User::new("a", "同名");
        let second = User::new("b", "同名");
        let msg = message(quoted("同名", "x", "y")).at("b");
        let quote = run(vec![first, second.clone()], msg).await.unwrap();
        assert_eq!(quote.author, second);
    }

    #[tokio::test]
    async fn test_unresolved_quote_ignored() {
        let quote = run(vec![User::new("a", "alice")], message(quoted("nobody", "x", "y"))).await;
        assert!(quote.is_none());
    }

    #[tokio::test]
    async fn test_empty_names_never_match() {
        // A member with only a nickname must not match a quote with an empty author.
        let quote = run(vec![User::new("a", "alice")], message(quoted("", "x", "y"))).await;
        assert!(quote.is_none());
    }
}
