//! 用户 → 托管钱包映射，持久化为 JSON 文件。

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::engine::RemoteSignerHandle;

const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("读取钱包注册表失败 {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("写入钱包注册表失败 {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("解析钱包注册表失败 {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("序列化钱包注册表失败: {0}")]
    Serialize(serde_json::Error),
    #[error("用户 {0} 尚未创建钱包")]
    UnknownUser(String),
    #[error("用户 {user} 已绑定钱包 {wallet_id}")]
    AlreadyRegistered { user: String, wallet_id: String },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    #[serde(default)]
    wallets: BTreeMap<String, RemoteSignerHandle>,
}

#[derive(Debug)]
pub struct WalletRegistry {
    path: PathBuf,
    entries: DashMap<String, RemoteSignerHandle>,
    persist_lock: Mutex<()>,
}

impl WalletRegistry {
    /// 文件不存在视为空注册表。
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let entries = DashMap::new();
        match fs::read(&path).await {
            Ok(bytes) => {
                let file: RegistryFile =
                    serde_json::from_slice(&bytes).map_err(|source| RegistryError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                for (user, handle) in file.wallets {
                    entries.insert(user, handle);
                }
                debug!(
                    target: "wallet::registry",
                    path = %path.display(),
                    count = entries.len(),
                    "钱包注册表已加载"
                );
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(
                    target: "wallet::registry",
                    path = %path.display(),
                    "钱包注册表不存在，按空表处理"
                );
            }
            Err(source) => return Err(RegistryError::Read { path, source }),
        }
        Ok(Self {
            path,
            entries,
            persist_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, user: &str) -> Option<RemoteSignerHandle> {
        self.entries.get(user).map(|entry| entry.value().clone())
    }

    pub fn require(&self, user: &str) -> Result<RemoteSignerHandle, RegistryError> {
        self.get(user)
            .ok_or_else(|| RegistryError::UnknownUser(user.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 绑定新用户并落盘；同一用户不可重复绑定。
    pub async fn register(
        &self,
        user: &str,
        handle: RemoteSignerHandle,
    ) -> Result<(), RegistryError> {
        let _guard = self.persist_lock.lock().await;
        if let Some(existing) = self.entries.get(user) {
            return Err(RegistryError::AlreadyRegistered {
                user: user.to_string(),
                wallet_id: existing.wallet_id.clone(),
            });
        }
        self.entries.insert(user.to_string(), handle.clone());
        if let Err(err) = self.persist().await {
            self.entries.remove(user);
            return Err(err);
        }
        info!(
            target: "wallet::registry",
            user,
            wallet = %handle,
            "用户钱包已登记"
        );
        Ok(())
    }

    async fn persist(&self) -> Result<(), RegistryError> {
        let file = RegistryFile {
            version: REGISTRY_VERSION,
            wallets: self
                .entries
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        };
        let data = serde_json::to_vec_pretty(&file).map_err(RegistryError::Serialize)?;

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| RegistryError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, data)
            .await
            .map_err(|source| RegistryError::Write {
                path: tmp_path.clone(),
                source,
            })?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| RegistryError::Write {
                path: self.path.clone(),
                source,
            })
    }
}
