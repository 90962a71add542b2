use super::{context::ServiceContext, handlers};
use crate::error::{ProxyError, ProxyResult};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;

/// 可调用方法的编号，3 未使用
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MethodId {
    GetFiles = 1,
    DownloadFile = 2,
    RenameFile = 4,
    TrashFiles = 5,
    UntrashFiles = 6,
    UploadFile = 7,
    Authenticate = 8,
    InsertFile = 9,
    MoveFiles = 10,
    CopyFiles = 11,
    GetLog = 12,
    GetFilesFromPath = 13,
    GetAbout = 14,
}

impl MethodId {
    pub const ALL: [MethodId; 13] = [
        MethodId::GetFiles,
        MethodId::DownloadFile,
        MethodId::RenameFile,
        MethodId::TrashFiles,
        MethodId::UntrashFiles,
        MethodId::UploadFile,
        MethodId::Authenticate,
        MethodId::InsertFile,
        MethodId::MoveFiles,
        MethodId::CopyFiles,
        MethodId::GetLog,
        MethodId::GetFilesFromPath,
        MethodId::GetAbout,
    ];

    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MethodId::GetFiles => "GetFiles",
            MethodId::DownloadFile => "DownloadFile",
            MethodId::RenameFile => "RenameFile",
            MethodId::TrashFiles => "TrashFiles",
            MethodId::UntrashFiles => "UntrashFiles",
            MethodId::UploadFile => "UploadFile",
            MethodId::Authenticate => "Authenticate",
            MethodId::InsertFile => "InsertFile",
            MethodId::MoveFiles => "MoveFiles",
            MethodId::CopyFiles => "CopyFiles",
            MethodId::GetLog => "GetLog",
            MethodId::GetFilesFromPath => "GetFilesFromPath",
            MethodId::GetAbout => "GetAbout",
        }
    }

    /// 接受方法名（不区分大小写）或数字编号
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if let Ok(value) = token.parse::<u8>() {
            return Self::ALL.into_iter().find(|id| id.value() == value);
        }
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Boolean,
    Integer,
    /// 一个或多个尾随参数
    StringList,
}

impl ParameterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterKind::String => "String",
            ParameterKind::Boolean => "Boolean",
            ParameterKind::Integer => "Integer",
            ParameterKind::StringList => "String[]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub required: bool,
}

impl Parameter {
    pub const fn required(name: &'static str, kind: ParameterKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: ParameterKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// 一个可调用方法：输入位置参数，输出响应文本
pub trait MethodHandler: Send + Sync {
    fn id(&self) -> MethodId;
    fn parameters(&self) -> &'static [Parameter];
    fn invoke(&self, ctx: &ServiceContext, args: &[String]) -> ProxyResult<String>;
}

/// 按编号索引的只读方法表
pub struct Registry {
    handlers: BTreeMap<MethodId, Box<dyn MethodHandler>>,
}

impl Registry {
    /// 为 `handlers` 建立索引；编号重复时报错
    pub fn build(handlers: Vec<Box<dyn MethodHandler>>) -> ProxyResult<Self> {
        let mut table = BTreeMap::new();
        for handler in handlers {
            let id = handler.id();
            if table.insert(id, handler).is_some() {
                return Err(ProxyError::DuplicateMethod(id.value()));
            }
        }
        Ok(Self { handlers: table })
    }

    pub fn resolve(&self, token: &str) -> ProxyResult<&dyn MethodHandler> {
        MethodId::parse(token)
            .and_then(|id| self.handlers.get(&id))
            .map(|handler| handler.as_ref())
            .ok_or_else(|| ProxyError::UnknownMethod(token.trim().to_string()))
    }

    /// 按编号排序的处理器
    pub fn handlers(&self) -> impl Iterator<Item = &dyn MethodHandler> {
        self.handlers.values().map(|handler| handler.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

static REGISTRY: Lazy<ProxyResult<Registry>> = Lazy::new(|| Registry::build(handlers::all()));

/// 进程级注册表，首次使用时构建
pub fn registry() -> ProxyResult<&'static Registry> {
    REGISTRY
        .as_ref()
        .map_err(|err| ProxyError::invalid_state(format!("method registry unavailable: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(MethodId);

    impl MethodHandler for Fixed {
        fn id(&self) -> MethodId {
            self.0
        }

        fn parameters(&self) -> &'static [Parameter] {
            &[]
        }

        fn invoke(&self, _ctx: &ServiceContext, _args: &[String]) -> ProxyResult<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let result = Registry::build(vec![
            Box::new(Fixed(MethodId::GetLog)),
            Box::new(Fixed(MethodId::GetLog)),
        ]);
        assert!(matches!(result, Err(ProxyError::DuplicateMethod(12))));
    }

    #[test]
    fn test_tokens_resolve_by_name_or_number() {
        assert_eq!(MethodId::parse("downloadfile"), Some(MethodId::DownloadFile));
        assert_eq!(MethodId::parse("12"), Some(MethodId::GetLog));
        assert_eq!(MethodId::parse("3"), None);
        assert_eq!(MethodId::parse("Nope"), None);
    }

    #[test]
    fn test_global_registry_covers_every_method() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), MethodId::ALL.len());
        for id in MethodId::ALL {
            assert_eq!(registry.resolve(id.as_str()).unwrap().id(), id);
        }
        assert!(matches!(
            registry.resolve("Unknown"),
            Err(ProxyError::UnknownMethod(_))
        ));
    }
}
