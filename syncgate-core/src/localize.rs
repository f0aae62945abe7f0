use anyhow::{anyhow, Result};
use fluent_bundle::{FluentArgs, FluentBundle, FluentResource, FluentValue};
use unic_langid::LanguageIdentifier;

use crate::operator::AckReason;

/// Fluent-based localizer with built-in resources.
pub struct FluentLoc {
    bundle: FluentBundle<FluentResource>,
}

impl FluentLoc {
    /// Create a localizer using the built-in `.ftl` strings (see ../i18n).
    pub fn builtin(lang: &str) -> Result<Self> {
        let langid: LanguageIdentifier = lang
            .parse()
            .or_else(|_| "en-GB".parse())
            .map_err(|e| anyhow!("language id: {e}"))?;

        // Only en-GB ships for now.
        let ftl_src = include_str!("../i18n/en-GB.ftl");

        let res = FluentResource::try_new(ftl_src.to_owned())
            .map_err(|_| anyhow!("invalid FTL resource (en-GB.ftl)"))?;

        let mut bundle = FluentBundle::new(vec![langid]);
        // Values are shown on a terminal; no bidi isolation marks.
        bundle.set_use_isolating(false);
        bundle.add_resource(res).map_err(|_| anyhow!("failed to add FTL resource"))?;
        Ok(Self { bundle })
    }

    /// Format a message by code with named args (("name","value"), ...).
    /// Returns the code itself if not found.
    pub fn msg(&self, code: &str, args: &[(&str, &str)]) -> String {
        let Some(msg) = self.bundle.get_message(code) else {
            return code.to_string();
        };
        let Some(pattern) = msg.value() else {
            return code.to_string();
        };

        let mut fa = FluentArgs::new();
        for (k, v) in args {
            fa.set(*k, FluentValue::from(*v));
        }

        let mut errs = vec![];
        let s = self.bundle.format_pattern(pattern, Some(&fa), &mut errs).to_string();

        if errs.is_empty() {
            s
        } else {
            code.to_string()
        }
    }

    /// Prompt text for an operator checkpoint.
    pub fn prompt(&self, reason: &AckReason) -> String {
        let owned = reason.args();
        let args: Vec<(&str, &str)> = owned.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.msg(reason.code(), &args)
    }
}
