use std::net::SocketAddr;

use thiserror::Error;

use crate::rules::RuleError;

#[derive(Debug, Error)]
pub enum Error {
    /// 포트 바인딩 실패. 운영자가 바로 알아차리도록 프로세스를 종료합니다.
    #[error("{addr} 바인딩 실패: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// 스니핑 포트가 HTTP 규칙이 있는 허용 포트와 겹침
    #[error("포트 {port}가 tcp 스니핑 포트와 HTTP 리스너 양쪽에 필요함")]
    PortConflict { port: u16 },

    #[error("규칙 로드 실패: {0}")]
    Rules(#[from] RuleError),
}

impl Error {
    /// 프로세스를 끝내야 하는 에러인지.
    ///
    /// 리로드 중의 규칙 로드 실패와 포트 계획 충돌은 이전 리스너를 그대로 두고 복구됩니다.
    /// 최초 로드 실패는 호출하는 쪽에서 치명적으로 다룹니다.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Rules(_) | Error::PortConflict { .. })
    }
}
