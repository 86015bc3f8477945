use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use super::{Result, RuleError, RuleSet};

/// 규칙 파일 경로를 들고 있는 로더. 엔진이 라우팅 데이터를 얻는 유일한 경로입니다.
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 파일을 읽어 새 `RuleSet`을 만듭니다. 기존 세트는 절대 수정하지 않습니다.
    #[instrument(skip(self), fields(path = %self.path.display()), level = "debug", err)]
    pub async fn load(&self) -> Result<RuleSet> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RuleError::Read {
                path: self.path.clone(),
                source: e,
            })?;

        let rule_set = RuleSet::from_json_str(&content)?;
        info!(
            rules = rule_set.len(),
            allowed_ports = ?rule_set.allowed_ports(),
            "규칙 파일 로드 완료"
        );
        Ok(rule_set)
    }
}
