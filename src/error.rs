//! Erros do programa
//!
//! Separados por camada: validação (carga do CSV e configuração, saída 2) e
//! execução (envio por worker, saída 1).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Falhas ao carregar o CSV.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Erro ao abrir CSV {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV inválido: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV sem coluna obrigatória: {column} no cabeçalho {header:?}")]
    MissingColumn { column: String, header: Vec<String> },

    #[error("Linha {line}: coluna {column} ausente")]
    MissingField { line: u64, column: String },

    #[error("Linha {line}: valor numérico inválido em {column}: {value:?}")]
    InvalidNumber {
        line: u64,
        column: String,
        value: String,
    },

    #[error("Linha {line}: timestamp inválido {value:?}: {source}")]
    InvalidTimestamp {
        line: u64,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Falhas ao montar a configuração de conexão.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Nenhum endereço informado em --addrs")]
    NoAddresses,

    #[error("Endereço inválido {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },
}

/// Falhas de um sender (conexão, codificação, envio HTTP).
#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Erro ao criar cliente HTTP: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Erro de transporte: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Servidor rejeitou o lote (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Retry esgotado após {elapsed:?}: {last}")]
    RetryTimeout {
        elapsed: Duration,
        #[source]
        last: Box<SenderError>,
    },

    #[error("Erro de codificação: {0}")]
    Encode(String),

    #[error("Erro de conexão: {0}")]
    Connect(String),
}

impl SenderError {
    /// Erros transitórios que valem nova tentativa.
    pub fn is_retriable(&self) -> bool {
        match self {
            SenderError::Transport(e) => !e.is_builder(),
            SenderError::Rejected { status, .. } => {
                matches!(status, 500 | 503 | 504 | 507 | 509 | 523 | 524 | 529 | 599)
            }
            _ => false,
        }
    }
}

/// Etapa do worker em que a falha ocorreu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStage {
    Connect,
    Send,
    Flush,
}

impl std::fmt::Display for WorkerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStage::Connect => "connect",
            WorkerStage::Send => "send",
            WorkerStage::Flush => "flush",
        };
        f.write_str(s)
    }
}

/// Falha terminal de um worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Sender {worker_id} falhou em {stage}: {source}")]
    Failed {
        worker_id: usize,
        stage: WorkerStage,
        #[source]
        source: SenderError,
    },

    #[error("Sender {worker_id} interrompido: {reason}")]
    Interrupted { worker_id: usize, reason: String },
}

impl WorkerError {
    pub fn worker_id(&self) -> usize {
        match self {
            WorkerError::Failed { worker_id, .. } | WorkerError::Interrupted { worker_id, .. } => {
                *worker_id
            }
        }
    }
}

/// Resultado agregado com falha.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("O conjunto de linhas está vazio")]
    EmptyRowStore,

    #[error("{failed} de {total} senders falharam; primeiro erro: {first}")]
    WorkersFailed {
        failed: usize,
        total: usize,
        #[source]
        first: WorkerError,
    },
}

pub type Result<T, E = SenderError> = std::result::Result<T, E>;

/// Argumentos válidos para o clap, mas inválidos para a execução.
#[derive(Error, Debug)]
pub enum ArgsError {
    #[error("Arquivo CSV não encontrado: {}", .0.display())]
    CsvNotFound(PathBuf),

    #[error("--{flag} deve ser > 0 (recebido {value})")]
    NotPositive { flag: &'static str, value: i64 },
}

/// Qualquer falha da execução, com o código de saída correspondente.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Args(#[from] ArgsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("CSV sem linhas de dados: {}", .0.display())]
    EmptyCsv(PathBuf),

    #[error("Worker falhou: {0}")]
    Dispatch(#[from] DispatchError),
}

impl AppError {
    /// 2 para uso/validação (antes de qualquer rede), 1 para falha de worker.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Dispatch(DispatchError::WorkersFailed { .. }) => 1,
            _ => 2,
        }
    }
}
