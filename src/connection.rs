//! Configuração de conexão (endereços, autenticação, TLS, retry)
//!
//! Montada uma única vez a partir da linha de comando e compartilhada por
//! todos os workers. Não abre nenhuma conexão: cada worker chama
//! [`Connector::connect`] e recebe o seu próprio sender.

use crate::error::{ConfigError, Result, SenderError};
use crate::ilp::ProtocolVersion;
use crate::sender::{Connector, HttpLineSender, RetryPolicy};
use async_trait::async_trait;
use reqwest::Url;
use std::fmt;
use std::time::Duration;

/// Teto fixo da espera entre tentativas.
pub const MAX_BACKOFF: Duration = Duration::from_millis(5000);

/// Versão fixa do protocolo, por compatibilidade com o servidor.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::V2;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const MASK: &str = "***";

#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl Auth {
    /// Token tem prioridade sobre usuário/senha. Strings vazias contam como ausentes.
    pub fn resolve(token: Option<&str>, username: Option<&str>, password: Option<&str>) -> Self {
        let present = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);

        if let Some(token) = present(token) {
            return Auth::Bearer(token);
        }
        match (present(username), present(password)) {
            (Some(username), Some(password)) => Auth::Basic { username, password },
            _ => Auth::None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Auth::None)
    }
}

// Debug manual: segredos nunca vão para o log
impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Bearer(_) => f.debug_tuple("Bearer").field(&MASK).finish(),
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &MASK)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Disabled,
    /// TLS ativo aceitando qualquer certificado do servidor.
    ///
    /// Usado sempre que há autenticação, para simplificar ambientes de
    /// laboratório com certificados autoassinados. Não valida o servidor.
    InsecureSkipVerify,
}

impl TlsMode {
    fn scheme(self) -> &'static str {
        match self {
            TlsMode::Disabled => "http",
            TlsMode::InsecureSkipVerify => "https",
        }
    }
}

/// Parâmetros de transporte resolvidos. Imutável depois de construído.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    addresses: Vec<String>,
    endpoints: Vec<Url>,
    auth: Auth,
    tls: TlsMode,
    retry_timeout: Duration,
    max_backoff: Duration,
    protocol_version: ProtocolVersion,
}

impl ConnectionConfig {
    /// Monta a configuração a partir de uma lista de endereços separados por vírgula.
    pub fn build(
        addrs_csv: &str,
        token: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
        retry_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let addresses = parse_addresses(addrs_csv)?;
        let auth = Auth::resolve(token, username, password);
        let tls = if auth.is_enabled() {
            TlsMode::InsecureSkipVerify
        } else {
            TlsMode::Disabled
        };

        let endpoints = addresses
            .iter()
            .map(|addr| endpoint_url(tls, addr))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            addresses,
            endpoints,
            auth,
            tls,
            retry_timeout,
            max_backoff: MAX_BACKOFF,
            protocol_version: PROTOCOL_VERSION,
        })
    }

    #[cfg(test)]
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    #[cfg(test)]
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    #[cfg(test)]
    pub fn tls(&self) -> TlsMode {
        self.tls
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.retry_timeout,
            max_backoff: self.max_backoff,
        }
    }

    /// String de configuração completa, com segredos em texto puro.
    ///
    /// Nunca logar diretamente: use o `Display`, que mascara token e senha.
    #[cfg(test)]
    pub fn conf_string(&self) -> String {
        self.render(true)
    }

    /// `;` dentro de um valor é escrito como `;;`. Com `reveal = false`, o
    /// valor de token e senha vira `***` já na montagem.
    fn render(&self, reveal: bool) -> String {
        let secret = |value: &str| if reveal { escape(value) } else { MASK.to_string() };

        let mut conf = format!("{}::", self.tls.scheme());
        for addr in &self.addresses {
            conf.push_str(&format!("addr={};", escape(addr)));
        }
        match &self.auth {
            Auth::None => {}
            Auth::Bearer(token) => conf.push_str(&format!("token={};", secret(token))),
            Auth::Basic { username, password } => conf.push_str(&format!(
                "username={};password={};",
                escape(username),
                secret(password)
            )),
        }
        if self.tls == TlsMode::InsecureSkipVerify {
            conf.push_str("tls_verify=unsafe_off;");
        }
        conf.push_str(&format!(
            "retry_timeout={};max_backoff_millis={};protocol_version={};",
            self.retry_timeout.as_millis(),
            self.max_backoff.as_millis(),
            self.protocol_version.as_u8()
        ));
        conf
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

fn escape(value: &str) -> String {
    value.replace(';', ";;")
}

#[async_trait]
impl Connector for ConnectionConfig {
    type Sender = HttpLineSender;

    async fn connect(&self, _worker_id: usize) -> Result<HttpLineSender> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(self.tls == TlsMode::InsecureSkipVerify)
            .build()
            .map_err(SenderError::Client)?;

        HttpLineSender::new(
            client,
            self.endpoints.clone(),
            self.auth.clone(),
            self.protocol_version,
            self.retry_policy(),
        )
    }
}

fn parse_addresses(addrs_csv: &str) -> Result<Vec<String>, ConfigError> {
    let addresses: Vec<String> = addrs_csv
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if addresses.is_empty() {
        return Err(ConfigError::NoAddresses);
    }
    Ok(addresses)
}

fn endpoint_url(tls: TlsMode, addr: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddress {
        addr: addr.to_string(),
        reason,
    };

    let url = Url::parse(&format!("{}://{}/write", tls.scheme(), addr))
        .map_err(|e| invalid(e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) || url.path() != "/write" {
        return Err(invalid("esperado host:porta".to_string()));
    }
    Ok(url)
}
