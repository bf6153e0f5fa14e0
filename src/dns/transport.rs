use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::proto::op::{Message, MessageType, OpCode, Query};
use hickory_resolver::proto::rr::{Name, RData, RecordType};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

pub use hickory_resolver::proto::op::ResponseCode;

use crate::common::ResolveError;
use crate::config::ClientTimeouts;

/// 单条 DNS 报文的最大接收长度
const MAX_UDP_PAYLOAD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    Aaaa,
    Ptr,
}

impl From<RecordKind> for RecordType {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::A => RecordType::A,
            RecordKind::Aaaa => RecordType::AAAA,
            RecordKind::Ptr => RecordType::PTR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    /// 完全限定名（以 `.` 结尾）
    pub name: String,
    pub kind: RecordKind,
}

impl Question {
    pub fn new(name: &str, kind: RecordKind) -> Self {
        Self {
            name: fqdn(name),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub rcode: ResponseCode,
    pub answers: Vec<Answer>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.rcode == ResponseCode::NoError
    }

    /// 与问题类型匹配的地址记录，按应答顺序
    pub fn addrs(&self, kind: RecordKind) -> impl Iterator<Item = String> + '_ {
        self.answers.iter().filter_map(move |answer| match (kind, answer) {
            (RecordKind::A, Answer::A(ip)) => Some(ip.to_string()),
            (RecordKind::Aaaa, Answer::Aaaa(ip)) => Some(ip.to_string()),
            _ => None,
        })
    }

    /// 第一条 PTR 记录，去掉末尾的 `.`
    pub fn first_ptr(&self) -> Option<String> {
        self.answers.iter().find_map(|answer| match answer {
            Answer::Ptr(name) => Some(name.trim_end_matches('.').to_string()),
            _ => None,
        })
    }
}

/// 向一个服务器发送一个问题并取回应答
#[async_trait]
pub trait DnsTransport: Send + Sync {
    async fn exchange(&self, question: &Question, server: &str) -> Result<Response, ResolveError>;
}

pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// 反向查询名，如 `4.3.2.1.in-addr.arpa.`
pub fn reverse_addr_name(ip: &str) -> Result<String, ResolveError> {
    let bare = ip.trim_start_matches('[').trim_end_matches(']');
    let addr: IpAddr = bare
        .parse()
        .map_err(|_| ResolveError::InvalidInput(format!("not a valid ip address: {}", ip)))?;
    Ok(Name::from(addr).to_string())
}

pub(crate) fn build_query(questions: &[Question], id: u16) -> Result<Message, ResolveError> {
    let mut msg = Message::new();
    msg.set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    for question in questions {
        let name = Name::from_ascii(&question.name).map_err(|e| {
            ResolveError::InvalidInput(format!("invalid name '{}': {}", question.name, e))
        })?;
        msg.add_query(Query::query(name, question.kind.into()));
    }
    Ok(msg)
}

/// 把 hickory 的记录转换为本地类型，忽略其他记录类型
pub(crate) fn convert_answers<'a>(
    records: impl Iterator<Item = &'a hickory_resolver::proto::rr::Record>,
) -> Vec<Answer> {
    records
        .filter_map(|record| match record.data()? {
            RData::A(a) => Some(Answer::A(a.0)),
            RData::AAAA(aaaa) => Some(Answer::Aaaa(aaaa.0)),
            RData::PTR(ptr) => Some(Answer::Ptr(ptr.0.to_string())),
            _ => None,
        })
        .collect()
}

/// 经典 UDP DNS 客户端，拨号 / 读 / 写各自有超时
pub struct UdpTransport {
    timeouts: ClientTimeouts,
}

impl UdpTransport {
    pub fn new(timeouts: ClientTimeouts) -> Self {
        Self { timeouts }
    }

    async fn connect(&self, server: SocketAddr) -> Result<UdpSocket, ResolveError> {
        let bind: SocketAddr = match server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = with_timeout(self.timeouts.dial, "dial", UdpSocket::bind(bind)).await?;
        with_timeout(self.timeouts.dial, "dial", socket.connect(server)).await?;
        Ok(socket)
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new(ClientTimeouts::default())
    }
}

#[async_trait]
impl DnsTransport for UdpTransport {
    async fn exchange(&self, question: &Question, server: &str) -> Result<Response, ResolveError> {
        let server_addr: SocketAddr = server
            .parse()
            .map_err(|_| ResolveError::Transport(format!("invalid server address: {}", server)))?;

        let query = build_query(std::slice::from_ref(question), rand::random())?;
        let bytes = query
            .to_vec()
            .map_err(|e| ResolveError::Transport(format!("encode query: {}", e)))?;

        let socket = self.connect(server_addr).await?;
        with_timeout(self.timeouts.write, "write", socket.send(&bytes)).await?;

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        let n = with_timeout(self.timeouts.read, "read", socket.recv(&mut buf)).await?;
        let reply = Message::from_vec(&buf[..n])
            .map_err(|e| ResolveError::Transport(format!("decode reply from {}: {}", server, e)))?;
        if reply.id() != query.id() {
            return Err(ResolveError::Transport(format!(
                "mismatched reply id from {}",
                server
            )));
        }
        if reply.truncated() {
            debug!(server = server, name = %question.name, "truncated DNS reply");
        }

        Ok(Response {
            rcode: reply.response_code(),
            answers: convert_answers(reply.answers().iter()),
        })
    }
}

async fn with_timeout<T>(
    limit: Duration,
    stage: &str,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> Result<T, ResolveError> {
    match timeout(limit, fut).await {
        Ok(result) => result.map_err(ResolveError::from),
        Err(_) => Err(ResolveError::Transport(format!("{} timeout", stage))),
    }
}
