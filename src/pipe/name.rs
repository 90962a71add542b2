use uuid::Uuid;

const SESSION_ENV: &str = "DRIVE_PROXY_SESSION";

/// 按登录会话隔离的公共管道名：`{base}_{user}.{domain}.{session}`
pub fn well_known_name(base: &str) -> String {
    format!(
        "{base}_{}.{}.{}",
        sanitize(&user_name()),
        sanitize(&domain_name()),
        session_id()
    )
}

/// 重定向得到的私有管道名
pub fn redirect_name(base: &str, guid: &str) -> String {
    format!("{base}_{guid}")
}

/// 生成 32 位小写十六进制的 guid
pub fn new_redirect_guid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 是否为 `new_redirect_guid` 格式的 32 位十六进制串
pub fn is_redirect_guid(value: &str) -> bool {
    value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn user_name() -> String {
    whoami::username().unwrap_or_else(|_| "user".to_string())
}

fn domain_name() -> String {
    std::env::var("USERDOMAIN")
        .ok()
        .filter(|domain| !domain.trim().is_empty())
        .unwrap_or_else(|| "local".to_string())
}

fn session_id() -> u32 {
    if let Some(id) = std::env::var(SESSION_ENV)
        .ok()
        .and_then(|value| value.trim().parse().ok())
    {
        return id;
    }
    platform_session_id()
}

#[cfg(windows)]
fn platform_session_id() -> u32 {
    use windows_sys::Win32::System::{
        RemoteDesktop::ProcessIdToSessionId, Threading::GetCurrentProcessId,
    };

    let mut session = 0u32;
    // SAFETY: 调用期间 `session` 是有效的输出指针
    let ok = unsafe { ProcessIdToSessionId(GetCurrentProcessId(), &mut session) };
    if ok == 0 {
        tracing::debug!("ProcessIdToSessionId failed, using session 0");
        return 0;
    }
    session
}

#[cfg(unix)]
fn platform_session_id() -> u32 {
    // SAFETY: getsid(0) 只查询当前进程
    let sid = unsafe { libc::getsid(0) };
    u32::try_from(sid).unwrap_or(0)
}

#[cfg(not(any(windows, unix)))]
fn platform_session_id() -> u32 {
    0
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
