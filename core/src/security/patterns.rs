//! Pattern tables for the screener.
//!
//! Patterns are matched per line, case-insensitively. They are deliberately
//! coarse: a match is a reason to stop and look, not proof of intent.

use lazy_static::lazy_static;
use regex::Regex;

use super::IssueCategory;

pub(crate) struct Rule {
    pub category: IssueCategory,
    pub message: &'static str,
    pub regex: Regex,
    /// Lines matching this are exempt from the rule.
    pub unless: Option<Regex>,
}

fn rule(category: IssueCategory, message: &'static str, pattern: &str) -> Rule {
    Rule {
        category,
        message,
        regex: Regex::new(pattern).expect("static screening pattern"),
        unless: None,
    }
}

fn rule_unless(
    category: IssueCategory,
    message: &'static str,
    pattern: &str,
    unless: &str,
) -> Rule {
    Rule {
        unless: Some(Regex::new(unless).expect("static screening pattern")),
        ..rule(category, message, pattern)
    }
}

lazy_static! {
    /// Operations that are rejected regardless of capability flags.
    pub(crate) static ref DANGEROUS_RULES: Vec<Rule> = {
        use IssueCategory::*;
        vec![
            // destructive delete
            rule(DestructiveDelete, "recursive forced delete", r"(?i)\brm\s+(?:-[a-z]+\s+)*-[a-z]*(?:r[a-z]*f|f[a-z]*r)"),
            rule(DestructiveDelete, "recursive forced delete", r"(?i)\brm\s+-[a-z]*r[a-z]*\s+-[a-z]*f"),
            rule(DestructiveDelete, "recursive forced delete", r"(?i)\bremove-item\b.*-recurse.*-force|\bremove-item\b.*-force.*-recurse"),
            rule(DestructiveDelete, "silent recursive delete", r"(?i)\b(?:del|erase|rmdir|rd)\b.*\s/[sq]\b"),
            rule(DestructiveDelete, "secure file shredding", r"(?i)\bshred\b"),
            rule(DestructiveDelete, "recursive tree removal", r"(?i)\bshutil\.rmtree\b"),
            // disk formatting
            rule(DiskFormat, "filesystem creation", r"(?i)\bmkfs(?:\.[a-z0-9]+)?\b"),
            rule(DiskFormat, "drive formatting", r"(?i)\bformat(?:\.com)?\s+[a-z]:"),
            rule(DiskFormat, "volume formatting", r"(?i)\b(?:format-volume|clear-disk|initialize-disk)\b"),
            rule(DiskFormat, "partition editor", r"(?i)\bdiskpart\b"),
            rule(DiskFormat, "raw device write", r"(?i)\bdd\s+.*\bof=/dev/"),
            rule(DiskFormat, "raw device write", r"(?i)>\s*/dev/(?:sd[a-z]|hd[a-z]|nvme\d|disk\d)"),
            // accounts and shares
            rule(AccountManipulation, "account or share management", r"(?i)\bnet\s+(?:user|localgroup|group|share)\b"),
            rule(AccountManipulation, "account management", r"(?i)\b(?:useradd|userdel|usermod|adduser|deluser|groupadd|chpasswd)\b"),
            rule(AccountManipulation, "password change", r"(?i)(?:^|[\s;&|])passwd(?:\s|$)"),
            rule(AccountManipulation, "local account management", r"(?i)\b(?:new|remove|set|add|enable|disable)-local(?:user|group|groupmember)\b"),
            rule(AccountManipulation, "network share management", r"(?i)\b(?:new|remove|set|grant)-smbshare(?:access)?\b"),
            // registry writes
            rule(RegistryModification, "registry edit", r"(?i)\breg(?:\.exe)?\s+(?:add|delete|import|load|restore|copy)\b"),
            rule(RegistryModification, "registry property edit", r"(?i)\b(?:set|new|remove|rename)-itemproperty\b"),
            rule(RegistryModification, "registry editor", r"(?i)\bregedit(?:\.exe)?\b"),
            rule(RegistryModification, "registry key edit", r"(?i)\b(?:remove-item|new-item|set-item)\b.*\bhk(?:lm|cu|cr|u|cc):"),
            // shutdown / reboot
            rule(Shutdown, "system shutdown or reboot", r"(?i)(?:^|[\s;&|(])(?:shutdown|reboot|poweroff|halt)(?:\s|;|$)"),
            rule(Shutdown, "system shutdown or reboot", r"(?i)\b(?:stop|restart)-computer\b"),
            rule(Shutdown, "runlevel change", r"(?i)\binit\s+[06]\b"),
            rule(Shutdown, "system shutdown or reboot", r"(?i)\bsystemctl\s+(?:poweroff|reboot|halt)\b"),
            // download and execute
            rule(DownloadExecute, "download piped into a shell", r"(?i)\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:ba|z|k|da)?sh\b"),
            rule(DownloadExecute, "download piped into an interpreter", r"(?i)\b(?:curl|wget)\b[^|]*\|\s*(?:sudo\s+)?(?:python3?|perl|ruby|node)\b"),
            rule(DownloadExecute, "web request piped into Invoke-Expression", r"(?i)\b(?:invoke-webrequest|iwr|invoke-restmethod|irm)\b.*\|\s*(?:iex|invoke-expression)\b"),
            rule(DownloadExecute, "Invoke-Expression of downloaded content", r"(?i)\b(?:iex|invoke-expression)\b.*\b(?:downloadstring|downloadfile|invoke-webrequest|iwr|net\.webclient)"),
            rule(DownloadExecute, "download through certutil", r"(?i)\bcertutil(?:\.exe)?\b.*-urlcache"),
            rule(DownloadExecute, "download through bitsadmin", r"(?i)\bbitsadmin(?:\.exe)?\b.*/transfer"),
            // encoded commands
            rule(EncodedCommand, "encoded PowerShell command", r"(?i)\b(?:powershell|pwsh)(?:\.exe)?\b.*\s-(?:e|ec|enc|encodedcommand)\s+[a-z0-9+/=]{8,}"),
            rule(EncodedCommand, "base64 payload piped into a shell", r"(?i)\bbase64\s+(?:-d|--decode)\b.*\|\s*(?:ba|z)?sh\b"),
            // obfuscation markers
            rule(Obfuscation, "long base64 blob", r"[A-Za-z0-9+/]{120,}={0,2}"),
            rule(Obfuscation, "base64 decoding at runtime", r"(?i)\bfrombase64string\b"),
            rule(Obfuscation, "hex escaped string", r"(?i)(?:\\x[0-9a-f]{2}){8,}"),
            rule(Obfuscation, "character code concatenation", r"(?i)(?:\[char\]\s*\d+\s*\+\s*){3,}"),
            rule(Obfuscation, "character array join", r"(?i)-join\s*\(?\s*\[char\[\]\]"),
        ]
    };

    /// Network use, rejected unless `allowNetworkAccess` is set.
    pub(crate) static ref NETWORK_RULES: Vec<Rule> = {
        use IssueCategory::NetworkAccess;
        vec![
            rule(NetworkAccess, "network client invocation", r"(?i)(?:^|[\s;&|(`$])(?:curl|wget|nc|ncat|netcat|telnet|ssh|scp|sftp|rsync|ftp)(?:\s|$)"),
            rule(NetworkAccess, "PowerShell network cmdlet", r"(?i)\b(?:invoke-webrequest|invoke-restmethod|iwr|irm|test-netconnection|start-bitstransfer|send-mailmessage)\b"),
            rule(NetworkAccess, ".NET network client", r"(?i)\bnet\.(?:webclient|sockets|http)"),
            rule(NetworkAccess, "network library import", r"(?i)\bimport\s+(?:requests|urllib\d?|socket|http\.client|httpx|aiohttp)\b"),
            rule(NetworkAccess, "network module require", r#"(?i)\brequire\(\s*['"](?:https?|net|axios|node-fetch)['"]\s*\)"#),
            rule(NetworkAccess, "HTTP fetch", r#"(?i)\bfetch\(\s*['"`]https?://"#),
        ]
    };

    /// File-system writes, rejected unless `allowFileSystemAccess` is set.
    pub(crate) static ref FILE_SYSTEM_RULES: Vec<Rule> = {
        use IssueCategory::FileSystemAccess;
        vec![
            rule(FileSystemAccess, "PowerShell file modification", r"(?i)\b(?:remove-item|copy-item|move-item|rename-item|new-item|set-content|add-content|out-file|clear-content)\b"),
            rule(FileSystemAccess, "file modification command", r"(?i)(?:^|[\s;&|])(?:rm|cp|mv|touch|mkdir|rmdir|chmod|chown|ln|tee|truncate)\s"),
            rule_unless(FileSystemAccess, "output redirection to a file", r#"(?:^|[^<>=&0-9-])>{1,2}\s*[~./\w$"']"#, r"(?i)>{1,2}\s*(?:/dev/null|nul\b|\$null)"),
            rule(FileSystemAccess, "file opened for writing", r#"(?i)\bopen\([^)]*['"][wax]\+?b?['"]"#),
            rule(FileSystemAccess, "file system mutation", r"(?i)\bos\.(?:remove|unlink|rmdir|removedirs|makedirs|mkdir|rename|replace)\("),
            rule(FileSystemAccess, "file system mutation", r"(?i)\bfs\.(?:writefile|appendfile|unlink|rm|rmdir|mkdir|rename)(?:sync)?\("),
        ]
    };

    /// Registry reads, rejected unless `allowRegistryAccess` is set.
    pub(crate) static ref REGISTRY_RULES: Vec<Rule> = {
        use IssueCategory::RegistryAccess;
        vec![
            rule(RegistryAccess, "registry drive access", r"(?i)\bhk(?:lm|cu|cr|u|cc):"),
            rule(RegistryAccess, "registry hive reference", r"(?i)\bhkey_(?:local_machine|current_user|classes_root|users|current_config)\b"),
            rule(RegistryAccess, "registry query", r"(?i)\breg(?:\.exe)?\s+query\b"),
            rule(RegistryAccess, "registry property read", r"(?i)\bget-itemproperty\b"),
            rule(RegistryAccess, "registry module", r"(?i)\b(?:import\s+winreg|winreg\.)"),
        ]
    };

    /// Environment access, rejected unless `allowEnvironmentAccess` is set.
    pub(crate) static ref ENVIRONMENT_RULES: Vec<Rule> = {
        use IssueCategory::EnvironmentAccess;
        vec![
            rule(EnvironmentAccess, "PowerShell environment drive", r"(?i)\$env:"),
            rule(EnvironmentAccess, ".NET environment variable access", r"(?i)\[(?:system\.)?environment\]::(?:get|set)environmentvariables?\b"),
            rule(EnvironmentAccess, "process environment access", r"(?i)\bos\.(?:environ\b|getenv\(|putenv\()|\bprocess\.env\b"),
            rule(EnvironmentAccess, "environment variable export", r"(?i)(?:^|[\s;&|])(?:export\s+[a-z_][a-z0-9_]*=|setx\s|printenv\b)"),
        ]
    };

    /// Captures the payload of `-EncodedCommand` style invocations.
    pub(crate) static ref ENCODED_PAYLOAD: Regex =
        Regex::new(r"(?i)\s-(?:e|ec|enc|encodedcommand)\s+([a-z0-9+/=]{8,})").expect("static screening pattern");
}

impl Rule {
    pub fn matches(&self, line: &str) -> bool {
        if !self.regex.is_match(line) {
            return false;
        }
        match &self.unless {
            Some(unless) => !unless.is_match(line),
            None => true,
        }
    }
}
