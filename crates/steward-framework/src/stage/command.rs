//! Command extraction and dispatch.
//!
//! A command is found in one of three ways, checked in order:
//!
//! 1. the message mentions the host (`@name\u{2005}cmd args`)
//! 2. the text starts with the reserved prefix (`#cmd args`)
//! 3. a quote continues a command: the quoted author is the host, or the
//!    quoted snippet starts with the prefix
//!
//! The command then passes the OTP gate (admin families only), the per-sender
//! rate limit and finally dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use steward_core::{InboundMessage, User};
use steward_store::keyword_rules;
use tracing::{debug, warn};

use crate::command::admin::{KeywordAdmin, PluginAdmin, TaskAdmin};
use crate::command::{CommandRelay, shell_split, split_head};
use crate::context::{Quote, RouteContext};
use crate::extension::{HostServices, Invocation};
use crate::limiter::RateLimiter;
use crate::otp::OtpVerifier;
use crate::pipeline::{Flow, Stage};
use crate::registry::{PluginRegistry, TaskRegistry};

const PLUGIN_ADMIN: &str = "插件";
const TASK_ADMIN: &str = "定时任务";
const KEYWORD_ADMIN: &str = "禁用词";
const HELP: &str = "help";

/// Router knobs that come from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSettings {
    /// Marks a message as a command.
    pub prefix: String,
    /// Keyword tried when nothing handled a command and no relay is set.
    pub fallback_keyword: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            prefix: "#".to_string(),
            fallback_keyword: "default".to_string(),
        }
    }
}

/// A command split into its keyword and the raw argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Command {
    name: String,
    args: String,
}

impl Command {
    fn parse(text: &str, prefix: &str) -> Option<Self> {
        let text = text.trim();
        let text = text.strip_prefix(prefix).unwrap_or(text).trim_start();
        let (name, args) = split_head(text);
        Self::new(name, args.unwrap_or_default())
    }

    fn new(name: &str, args: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            args: args.trim().to_string(),
        })
    }
}

/// Joins the non-empty parts with single spaces.
fn join_parts(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extracts, gates, rate limits and dispatches commands.
pub struct CommandStage {
    plugins: Arc<PluginRegistry>,
    tasks: Arc<TaskRegistry>,
    limiter: RateLimiter,
    otp: OtpVerifier,
    relay: Option<Arc<dyn CommandRelay>>,
    settings: RouterSettings,
}

impl CommandStage {
    /// Creates a stage with default limits and a bypass-only OTP gate.
    pub fn new(plugins: Arc<PluginRegistry>, tasks: Arc<TaskRegistry>) -> Self {
        Self {
            plugins,
            tasks,
            limiter: RateLimiter::default(),
            otp: OtpVerifier::bypass_only(),
            relay: None,
            settings: RouterSettings::default(),
        }
    }

    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_otp(mut self, otp: OtpVerifier) -> Self {
        self.otp = otp;
        self
    }

    /// Sends unhandled commands to `relay` instead of the fallback keyword.
    pub fn with_relay(mut self, relay: Arc<dyn CommandRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_settings(mut self, settings: RouterSettings) -> Self {
        self.settings = settings;
        self
    }

    fn services(&self) -> &HostServices {
        self.plugins.services()
    }

    // ─── Extraction ──────────────────────────────────────────────────────────

    async fn extract(&self, ctx: &RouteContext) -> Option<Command> {
        let msg = ctx.message();
        let quote = ctx.quote();
        let prefix = self.settings.prefix.as_str();
        let me = match ctx.transport().current_user().await {
            Ok(me) => Some(me),
            Err(e) => {
                warn!(error = %e, "Failed to resolve the current user");
                None
            }
        };

        if let Some(me) = &me
            && msg.at_target.as_deref() == Some(me.uid.as_str())
        {
            let name = self.name_in_group(ctx, me).await;
            let text = match &quote {
                Some(q) => join_parts(&[&q.body, &q.snippet]),
                None => msg.content.clone(),
            };
            let flag = if text.contains('\u{2005}') {
                format!("@{name}\u{2005}")
            } else {
                format!("@{name}")
            };
            let text = text.trim();
            let text = text.strip_prefix(flag.as_str()).unwrap_or(text);
            let (name, args) = split_head(text.trim());
            return Command::new(name, args.unwrap_or_default());
        }

        let text = quote.as_ref().map_or(msg.content.as_str(), |q| q.body.as_str());
        if text.trim_start().starts_with(prefix) {
            let snippet = quote.as_ref().map_or("", |q| q.snippet.as_str());
            return Command::parse(&join_parts(&[text, snippet]), prefix);
        }

        let quote = quote?;
        let from_me = me.as_ref().is_some_and(|me| me.uid == quote.author.uid);
        if !from_me && !quote.snippet.starts_with(prefix) {
            return None;
        }
        continuation(&quote, prefix)
    }

    /// The host's display name in the message's group, else its nickname.
    async fn name_in_group(&self, ctx: &RouteContext, me: &User) -> String {
        let gid = ctx.message().gid();
        match ctx.transport().members(gid).await {
            Ok(members) => members
                .iter()
                .find(|m| m.uid == me.uid)
                .map_or(me.group_name(), User::group_name)
                .to_string(),
            Err(e) => {
                debug!(gid = %gid, error = %e, "Member lookup failed; using own name");
                me.group_name().to_string()
            }
        }
    }

    // ─── Admin ───────────────────────────────────────────────────────────────

    /// Checks `<otp> <sub> <args>`. Returns the text after the OTP.
    fn gate<'a>(&self, msg: &InboundMessage, args: &'a str) -> Option<&'a str> {
        let (otp, rest) = split_head(args.trim());
        let rest = rest.map(str::trim).filter(|r| !r.is_empty())?;
        if !self.otp.verify(otp) {
            warn!(timestamp = msg.timestamp, "Admin token rejected");
            return None;
        }
        Some(rest)
    }

    async fn run_admin(&self, family: &str, msg: &InboundMessage, rest: &str) -> String {
        let tokens = shell_split(rest);
        let result = match family {
            PLUGIN_ADMIN => match PluginAdmin::try_parse_from(tokens) {
                Ok(cmd) => cmd.action.execute(&self.plugins).await,
                Err(e) => Err(e.to_string()),
            },
            TASK_ADMIN => match TaskAdmin::try_parse_from(tokens) {
                Ok(cmd) => cmd.action.execute(&self.tasks, msg.gid()).await,
                Err(e) => Err(e.to_string()),
            },
            _ => match KeywordAdmin::try_parse_from(tokens) {
                Ok(cmd) => {
                    cmd.action
                        .execute(&self.services().store, msg.gid(), msg.group_name())
                }
                Err(e) => Err(e.to_string()),
            },
        };
        match result {
            Ok(reply) => reply,
            Err(reply) => {
                debug!(family = %family, reply = %reply, "Admin command failed");
                reply
            }
        }
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    async fn help(&self) -> String {
        match self.plugins.list(false).await {
            Ok(listing) if !listing.is_empty() => {
                let mut reply = String::from("已加载的插件信息如下:\n");
                for item in listing {
                    let keyword = item.keyword.unwrap_or_default();
                    reply.push_str(&format!("[{keyword}]:{}\n", item.description));
                }
                reply
            }
            Ok(_) => "当前没有加载插件".to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to list plugins");
                "当前没有加载插件".to_string()
            }
        }
    }

    fn is_blocked(&self, msg: &InboundMessage, keyword: &str) -> bool {
        let checked = self.services().store.read(|conn| {
            keyword_rules::is_blocked(conn, keyword, msg.gid(), msg.group_name())
        });
        match checked {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!(keyword = %keyword, error = %e, "Keyword rule lookup failed");
                false
            }
        }
    }

    /// Runs the plugin bound to the command, then the fallback.
    ///
    /// Returns whether anything handled it.
    async fn dispatch(&self, ctx: &RouteContext, command: &Command) -> bool {
        let msg = ctx.message();
        let mut params = Vec::new();
        let keyword = match command.name.split_once('\n') {
            Some((keyword, leading)) => {
                params.push(leading.to_string());
                keyword
            }
            None => command.name.as_str(),
        };
        if !command.args.is_empty() {
            params.push(command.args.clone());
        }

        let invocation = Arc::new(Invocation::message(
            msg.clone(),
            keyword,
            params,
            self.services(),
        ));
        let handled = match self.plugins.invoke(keyword, Arc::clone(&invocation)).await {
            Ok(handled) => handled,
            Err(e) => {
                self.deliver(ctx, &invocation).await;
                ctx.reply_text(format!("调用插件出错:{}", e.user_message())).await;
                return true;
            }
        };
        self.deliver(ctx, &invocation).await;
        if handled {
            return true;
        }
        self.fallback(ctx, command).await
    }

    async fn fallback(&self, ctx: &RouteContext, command: &Command) -> bool {
        let msg = ctx.message();
        if let Some(relay) = &self.relay {
            let line = join_parts(&[&command.name, &command.args]);
            let relayed = relay.relay(msg, &line).await;
            debug!(command = %command.name, relayed, "Command relayed");
            return relayed;
        }

        let keyword = self.settings.fallback_keyword.as_str();
        let mut params = vec![command.name.clone()];
        if !command.args.is_empty() {
            params.push(command.args.clone());
        }
        let invocation = Arc::new(Invocation::message(
            msg.clone(),
            keyword,
            params,
            self.services(),
        ));
        let handled = self
            .plugins
            .invoke(keyword, Arc::clone(&invocation))
            .await
            .unwrap_or_else(|e| {
                warn!(keyword = %keyword, error = %e, "Fallback plugin failed");
                false
            });
        self.deliver(ctx, &invocation).await;
        handled
    }

    async fn deliver(&self, ctx: &RouteContext, invocation: &Invocation) {
        for reply in invocation.take_replies() {
            ctx.reply(reply).await;
        }
    }
}

/// Command carried by a quote continuation.
fn continuation(quote: &Quote, prefix: &str) -> Option<Command> {
    let body = quote.body.trim();
    if !body.starts_with(prefix)
        && let Some(snippet) = quote.snippet.strip_prefix(prefix)
    {
        let (name, rest) = split_head(snippet.trim());
        return Command::new(name, &join_parts(&[body, rest.unwrap_or_default()]));
    }
    let body = body.strip_prefix(prefix).unwrap_or(body).trim();
    let (name, rest) = split_head(body);
    Command::new(name, &join_parts(&[rest.unwrap_or_default(), &quote.snippet]))
}

#[async_trait]
impl Stage for CommandStage {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn run(&self, ctx: &RouteContext) -> Flow {
        let msg = ctx.message();
        if msg.is_system || msg.is_self || !msg.is_text() {
            return Flow::Continue;
        }
        let Some(command) = self.extract(ctx).await else {
            return Flow::Continue;
        };

        let admin = matches!(command.name.as_str(), PLUGIN_ADMIN | TASK_ADMIN | KEYWORD_ADMIN);
        let admin_args = if admin {
            match self.gate(msg, &command.args) {
                Some(rest) => Some(rest.to_string()),
                None => return Flow::Stop,
            }
        } else {
            None
        };

        if !self.limiter.allow(&msg.sender.uid) {
            debug!(sender = %msg.sender.uid, "Rate limited");
            ctx.absorb();
            return Flow::Stop;
        }

        if let Some(rest) = admin_args {
            let reply = self.run_admin(&command.name, msg, &rest).await;
            ctx.reply_text(reply).await;
            ctx.absorb();
            return Flow::Stop;
        }

        if command.name == HELP {
            ctx.reply_text(self.help().await).await;
            ctx.absorb();
            return Flow::Stop;
        }

        if self.is_blocked(msg, &command.name) {
            debug!(keyword = %command.name, gid = %msg.gid(), "Keyword blocked");
            return Flow::Stop;
        }

        if self.dispatch(ctx, &command).await {
            ctx.absorb();
        }
        Flow::Stop
    }
}

impl std::fmt::Debug for CommandStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandStage")
            .field("settings", &self.settings)
            .field("relay", &self.relay.is_some())
            .finish_non_exhaustive()
    }
}
