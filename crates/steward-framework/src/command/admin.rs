//! Privileged admin commands.
//!
//! Each family is a clap grammar parsed from the tokens following the OTP:
//!
//! ```text
//! <otp> 插件     install|update|bind|unbind|reload|uninstall|list ...
//! <otp> 定时任务 install|update|bind(on)|unbind(off)|reload|uninstall|list ...
//! <otp> 禁用词   add|del <keyword>
//! ```
//!
//! Arguments are optional in the grammar so that a missing one produces the
//! family's own error reply instead of a clap usage error.

use clap::{Parser, Subcommand};
use steward_store::{Store, StoreError, keyword_rules};
use tracing::warn;

use crate::error::ExtensionError;
use crate::registry::{PluginRegistry, TaskRegistry};

/// Reply text of an admin command; `Err` for failures.
pub type AdminReply = Result<String, String>;

/// Builds the failure reply. Storage causes are logged, never replied.
fn failed(prefix: &str, e: &ExtensionError) -> String {
    if let ExtensionError::Persistence(cause) = e {
        warn!(operation = %prefix, error = %cause, "Admin command failed in storage");
    }
    format!("{prefix}:{}", e.user_message())
}

// =============================================================================
// 插件
// =============================================================================

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "插件", no_binary_name = true, disable_version_flag = true)]
pub struct PluginAdmin {
    #[command(subcommand)]
    pub action: PluginAction,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PluginAction {
    /// Install from a path or URL
    Install { location: Option<String> },
    /// Re-fetch an installed plugin
    Update {
        id: Option<String>,
        location: Option<String>,
    },
    /// Bind a plugin to a keyword; `force` replaces an existing binding
    Bind {
        id: Option<String>,
        keyword: Option<String>,
        mode: Option<String>,
    },
    /// Remove a keyword binding
    Unbind { keyword: Option<String> },
    /// Swap the loaded instance for the stored source
    Reload { id: Option<String> },
    /// Remove a plugin and all its bindings
    Uninstall { id: Option<String> },
    /// List bound plugins, or every installed one with `installed`
    List { scope: Option<String> },
}

impl PluginAction {
    pub async fn execute(self, plugins: &PluginRegistry) -> AdminReply {
        match self {
            Self::Install { location } => {
                let location = location.ok_or("安装插件出错:请输入插件路径")?;
                let plugin = plugins
                    .install(&location)
                    .await
                    .map_err(|e| failed("安装插件出错", &e))?;
                let info = plugin.info();
                let mut reply = format!("插件安装成功，信息如下:\nID:{}\n", plugin.id());
                if !info.trigger_hint.is_empty() {
                    reply.push_str(&format!("默认唤醒词:{}\n", info.trigger_hint));
                }
                if !info.description.is_empty() {
                    reply.push_str(&format!("说明:{}\n", info.description));
                }
                Ok(reply)
            }
            Self::Update { id, location } => {
                let id = id.ok_or("更新插件出错:请输入插件ID")?;
                plugins
                    .update(&id, location.as_deref())
                    .await
                    .map_err(|e| failed("更新插件出错", &e))?;
                Ok(format!("插件{id}更新完成"))
            }
            Self::Bind { id, keyword, mode } => {
                let id = id.ok_or("绑定插件出错:请输入插件ID和唤醒词")?;
                let force = mode.as_deref() == Some("force");
                let plugin = plugins
                    .require(&id)
                    .await
                    .map_err(|e| failed("绑定插件出错", &e))?;
                let info = plugin.info();
                let bound = plugins
                    .bind(keyword.as_deref(), plugin, force)
                    .await
                    .map_err(|e| failed("绑定插件出错", &e))?;
                let mut reply = format!("插件绑定成功，信息如下:\nID:{id}\n唤醒词:{bound}\n");
                if !info.description.is_empty() {
                    reply.push_str(&format!("说明:{}\n", info.description));
                }
                Ok(reply)
            }
            Self::Unbind { keyword } => {
                let keyword = keyword.ok_or("解绑插件出错:请输入唤醒词")?;
                match plugins.unbind(&keyword).await {
                    Ok(true) => Ok("插件解绑成功".to_string()),
                    Ok(false) => Err(format!("解绑插件出错:唤醒词[{keyword}]未绑定插件")),
                    Err(e) => Err(failed("解绑插件出错", &e)),
                }
            }
            Self::Reload { id } => {
                let id = id.ok_or("重载插件出错:请输入插件ID")?;
                plugins
                    .reload(&id)
                    .await
                    .map_err(|e| failed("重载插件出错", &e))?;
                Ok(format!("插件{id}重载完成"))
            }
            Self::Uninstall { id } => {
                let id = id.ok_or("请输入插件ID")?;
                match plugins.uninstall(&id).await {
                    Ok(true) => Ok("插件卸载成功".to_string()),
                    Ok(false) => Ok("未找到插件信息".to_string()),
                    Err(e) => Err(failed("卸载插件出错", &e)),
                }
            }
            Self::List { scope } => {
                let from_store = scope.as_deref() == Some("installed");
                let listing = plugins
                    .list(from_store)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "Failed to list plugins");
                        "查询已安装的插件列表出错".to_string()
                    })?;
                if listing.is_empty() {
                    return Ok("当前没有安装插件".to_string());
                }
                let mut reply = String::from("已安装的插件信息如下:\n");
                for item in listing {
                    match &item.keyword {
                        Some(keyword) => reply.push_str(&format!("ID:{}({keyword})\n", item.id)),
                        None => {
                            reply.push_str(&format!("ID:{}(未绑定)\n", item.id));
                            if !item.trigger_hint.is_empty() {
                                reply.push_str(&format!("--默认唤醒词:[{}]\n", item.trigger_hint));
                            }
                        }
                    }
                    if !item.description.is_empty() {
                        reply.push_str(&format!("--说明:{}\n", item.description));
                    }
                }
                Ok(reply)
            }
        }
    }
}

// =============================================================================
// 定时任务
// =============================================================================

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "定时任务", no_binary_name = true, disable_version_flag = true)]
pub struct TaskAdmin {
    #[command(subcommand)]
    pub action: TaskAction,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Install from a path or URL
    Install { location: Option<String> },
    /// Re-fetch an installed task
    Update {
        id: Option<String>,
        location: Option<String>,
    },
    /// Schedule a task for this group
    #[command(alias = "on")]
    Bind {
        id: Option<String>,
        #[arg(num_args = 0.., allow_hyphen_values = true, trailing_var_arg = true)]
        spec: Vec<String>,
    },
    /// Stop a schedule by its id
    #[command(alias = "off")]
    Unbind { schedule_id: Option<String> },
    /// Swap the loaded instance for the stored source
    Reload { id: Option<String> },
    /// Remove a task and all its schedules
    Uninstall { id: Option<String> },
    /// List this group's schedules, or every installed task with `installed`
    List { scope: Option<String> },
}

impl TaskAction {
    /// Runs the action on behalf of group `target`.
    pub async fn execute(self, tasks: &TaskRegistry, target: &str) -> AdminReply {
        match self {
            Self::Install { location } => {
                let location = location.ok_or("安装任务出错:请输入安装路径")?;
                let task = tasks
                    .install(&location)
                    .await
                    .map_err(|e| failed("安装任务出错", &e))?;
                let mut reply = format!("任务安装成功，信息如下:\nID:{}\n", task.id());
                let description = task.info().description;
                if !description.is_empty() {
                    reply.push_str(&format!("说明:{description}\n"));
                }
                Ok(reply)
            }
            Self::Update { id, location } => {
                let id = id.ok_or("更新任务出错:请输入任务ID")?;
                tasks
                    .update(&id, location.as_deref())
                    .await
                    .map_err(|e| failed("更新任务出错", &e))?;
                Ok(format!("任务{id}更新完成"))
            }
            Self::Bind { id, spec } => {
                let spec = spec.join(" ");
                let (Some(id), false) = (id, spec.trim().is_empty()) else {
                    return Err("启动任务出错:请输入任务ID和触发周期".to_string());
                };
                let task = tasks
                    .require(&id)
                    .await
                    .map_err(|e| failed("启动任务出错", &e))?;
                let description = task.info().description;
                let schedule_id = tasks
                    .bind(task, &spec, target)
                    .await
                    .map_err(|e| failed("启动任务出错", &e))?;
                let mut reply =
                    format!("任务启动成功，信息如下:\n定时任务ID:{schedule_id}\n触发周期:{spec}\n");
                if !description.is_empty() {
                    reply.push_str(&format!("说明:{description}\n"));
                }
                Ok(reply)
            }
            Self::Unbind { schedule_id } => {
                let raw = schedule_id.ok_or("停止任务出错:请输入定时任务ID")?;
                let schedule_id: i64 = raw
                    .parse()
                    .map_err(|_| "停止任务出错:任务ID格式错误".to_string())?;
                match tasks.unbind(schedule_id).await {
                    Ok(true) => Ok("任务停止成功".to_string()),
                    Ok(false) => Err(format!("停止任务出错:定时任务[{schedule_id}]未加载")),
                    Err(e) => Err(failed("停止任务出错", &e)),
                }
            }
            Self::Reload { id } => {
                let id = id.ok_or("重载任务出错:请输入任务ID")?;
                tasks
                    .reload(&id)
                    .await
                    .map_err(|e| failed("重载任务出错", &e))?;
                Ok(format!("任务{id}重载完成"))
            }
            Self::Uninstall { id } => {
                let id = id.ok_or("请输入任务ID")?;
                match tasks.uninstall(&id).await {
                    Ok(true) => Ok("任务卸载成功".to_string()),
                    Ok(false) => Ok("未找到任务信息".to_string()),
                    Err(e) => Err(failed("卸载任务出错", &e)),
                }
            }
            Self::List { scope } => {
                let from_store = scope.as_deref() == Some("installed");
                let listing = tasks
                    .list(from_store, Some(target))
                    .await
                    .map_err(|e| {
                        warn!(error = %e, target = %target, "Failed to list tasks");
                        "查询任务列表出错".to_string()
                    })?;
                if listing.is_empty() {
                    return Ok("当前没有任务".to_string());
                }
                let mut reply = String::from("加载的任务信息如下:\n");
                for item in listing {
                    match (item.schedule_id, &item.spec) {
                        (Some(schedule_id), Some(spec)) => {
                            reply.push_str(&format!("ID:{schedule_id}\n"));
                            reply.push_str(&format!("--任务ID:[{}]\n", item.task_id));
                            reply.push_str(&format!("--触发周期:[{spec}]\n"));
                        }
                        _ => {
                            reply.push_str(&format!("任务ID:[{}](未启动)\n", item.task_id));
                        }
                    }
                    if !item.description.is_empty() {
                        reply.push_str(&format!("--说明:{}\n", item.description));
                    }
                }
                Ok(reply)
            }
        }
    }
}

// =============================================================================
// 禁用词
// =============================================================================

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "禁用词", no_binary_name = true, disable_version_flag = true)]
pub struct KeywordAdmin {
    #[command(subcommand)]
    pub action: KeywordAction,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeywordAction {
    /// Block a keyword in this group
    Add { keyword: Option<String> },
    /// Lift a block in this group
    Del { keyword: Option<String> },
}

impl KeywordAction {
    pub fn execute(self, store: &Store, gid: &str, group_name: &str) -> AdminReply {
        let operation_failed = |e: StoreError| {
            warn!(gid = %gid, error = %e, "Failed to update keyword rules");
            "操作失败".to_string()
        };
        match self {
            Self::Add { keyword } => {
                let keyword = keyword.ok_or("命令格式错误:请输入关键词")?;
                store
                    .transaction(|conn| {
                        keyword_rules::block_for_group(conn, &keyword, gid, group_name)
                    })
                    .map_err(operation_failed)?;
                Ok(format!("当前群已禁用关键词:{keyword}"))
            }
            Self::Del { keyword } => {
                let keyword = keyword.ok_or("命令格式错误:请输入关键词")?;
                store
                    .transaction(|conn| {
                        keyword_rules::unblock_for_group(conn, &keyword, gid, group_name)
                    })
                    .map_err(operation_failed)?;
                Ok(format!("当前群已解除关键词:{keyword} 禁用"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{Source, SourceFetcher};
    use crate::registry::testing::{ScriptedLoader, services};
    use crate::testing::MockTransport;
    use std::sync::Arc;
    use steward_core::User;

    fn plugin_action(args: &[&str]) -> PluginAction {
        PluginAdmin::try_parse_from(args).unwrap().action
    }

    fn task_action(args: &[&str]) -> TaskAction {
        TaskAdmin::try_parse_from(args).unwrap().action
    }

    #[test]
    fn test_grammar() {
        assert_eq!(
            plugin_action(&["bind", "weather", "天气", "force"]),
            PluginAction::Bind {
                id: Some("weather".into()),
                keyword: Some("天气".into()),
                mode: Some("force".into()),
            }
        );
        assert_eq!(plugin_action(&["list"]), PluginAction::List { scope: None });
        assert_eq!(
            task_action(&["on", "T", "@every", "5s"]),
            TaskAction::Bind {
                id: Some("T".into()),
                spec: vec!["@every".into(), "5s".into()],
            }
        );
        assert_eq!(
            task_action(&["off", "3"]),
            TaskAction::Unbind {
                schedule_id: Some("3".into())
            }
        );
        assert!(PluginAdmin::try_parse_from(["explode"]).is_err());
    }

    #[tokio::test]
    async fn test_plugin_flow() {
        let plugins = PluginRegistry::new(
            services(),
            Arc::new(ScriptedLoader::default()),
            SourceFetcher::default(),
        );
        plugins
            .install_source(Source::inline("", "weather|天气|forecast"))
            .await
            .unwrap();

        assert_eq!(
            PluginAction::Install { location: None }.execute(&plugins).await,
            Err("安装插件出错:请输入插件路径".to_string())
        );

        let reply = plugin_action(&["bind", "weather"]).execute(&plugins).await.unwrap();
        assert!(reply.contains("唤醒词:天气"));

        let reply = plugin_action(&["list"]).execute(&plugins).await.unwrap();
        assert_eq!(reply, "已安装的插件信息如下:\nID:weather(天气)\n--说明:forecast\n");

        assert_eq!(
            plugin_action(&["unbind", "雨"]).execute(&plugins).await,
            Err("解绑插件出错:唤醒词[雨]未绑定插件".to_string())
        );
        assert_eq!(
            plugin_action(&["unbind", "天气"]).execute(&plugins).await,
            Ok("插件解绑成功".to_string())
        );

        let reply = plugin_action(&["list", "installed"]).execute(&plugins).await.unwrap();
        assert!(reply.contains("ID:weather(未绑定)\n--默认唤醒词:[天气]\n"));

        assert_eq!(
            plugin_action(&["uninstall", "weather"]).execute(&plugins).await,
            Ok("插件卸载成功".to_string())
        );
        assert_eq!(
            plugin_action(&["uninstall", "weather"]).execute(&plugins).await,
            Ok("未找到插件信息".to_string())
        );
        assert_eq!(
            plugin_action(&["list"]).execute(&plugins).await,
            Ok("当前没有安装插件".to_string())
        );
    }

    #[tokio::test]
    async fn test_task_flow() {
        let transport = MockTransport::new(User::new("bot", "bot")).into_arc();
        let tasks = TaskRegistry::new(
            services(),
            Arc::new(ScriptedLoader::default()),
            SourceFetcher::default(),
            transport,
        );
        tasks
            .install_source(Source::inline("", "report||daily"))
            .await
            .unwrap();

        assert_eq!(
            task_action(&["on", "report"]).execute(&tasks, "g1").await,
            Err("启动任务出错:请输入任务ID和触发周期".to_string())
        );
        let reply = task_action(&["on", "report", "@daily"])
            .execute(&tasks, "g1")
            .await
            .unwrap();
        assert!(reply.starts_with("任务启动成功，信息如下:\n定时任务ID:1\n触发周期:@daily\n"));

        let reply = task_action(&["list"]).execute(&tasks, "g1").await.unwrap();
        assert_eq!(reply, "加载的任务信息如下:\nID:1\n--任务ID:[report]\n--触发周期:[@daily]\n--说明:daily\n");
        assert_eq!(
            task_action(&["list"]).execute(&tasks, "g2").await,
            Ok("当前没有任务".to_string())
        );

        assert_eq!(
            task_action(&["off", "x"]).execute(&tasks, "g1").await,
            Err("停止任务出错:任务ID格式错误".to_string())
        );
        assert_eq!(
            task_action(&["off", "9"]).execute(&tasks, "g1").await,
            Err("停止任务出错:定时任务[9]未加载".to_string())
        );
        assert_eq!(
            task_action(&["off", "1"]).execute(&tasks, "g1").await,
            Ok("任务停止成功".to_string())
        );
        tasks.shutdown();
    }

    #[test]
    fn test_keyword_rules() {
        let store = steward_store::Store::open_in_memory().unwrap();
        let add = KeywordAdmin::try_parse_from(["add", "天气"]).unwrap().action;
        assert_eq!(
            add.execute(&store, "g1", "G"),
            Ok("当前群已禁用关键词:天气".to_string())
        );
        assert!(store.read(|c| keyword_rules::is_blocked(c, "天气", "g1", "G")).unwrap());

        let del = KeywordAdmin::try_parse_from(["del", "天气"]).unwrap().action;
        assert_eq!(
            del.execute(&store, "g1", "G"),
            Ok("当前群已解除关键词:天气 禁用".to_string())
        );
        assert!(!store.read(|c| keyword_rules::is_blocked(c, "天气", "g1", "G")).unwrap());

        assert_eq!(
            KeywordAction::Add { keyword: None }.execute(&store, "g1", "G"),
            Err("命令格式错误:请输入关键词".to_string())
        );
    }

    #[tokio::test]
    async fn test_storage_failures_are_masked() {
        let plugins = PluginRegistry::new(
            services(),
            Arc::new(ScriptedLoader::default()),
            SourceFetcher::default(),
        );
        plugins
            .install_source(Source::inline("", "weather|天气|forecast"))
            .await
            .unwrap();
        let store = plugins.services().store.clone();
        store.exec("DROP TABLE addon_bind", &[]).unwrap();
        store.exec("DROP TABLE keyword_rule", &[]).unwrap();

        assert_eq!(
            plugin_action(&["bind", "weather"]).execute(&plugins).await,
            Err("绑定插件出错:操作失败".to_string())
        );
        assert!(plugins.find_by_key("天气").await.is_none());

        let add = KeywordAdmin::try_parse_from(["add", "天气"]).unwrap().action;
        assert_eq!(add.execute(&store, "g1", "G"), Err("操作失败".to_string()));
    }
}
