use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One renderable piece of a trust agent's verdict. Serialized with a
/// `component_type` discriminator so persisted results stay readable by
/// external tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "component_type", rename_all = "lowercase")]
pub enum Component {
    Grade {
        grade: String,
        #[serde(default = "default_scale")]
        scale: String,
        #[serde(default)]
        description: String,
    },
    Report {
        #[serde(default)]
        title: String,
        content: String,
    },
    Screenshot {
        path: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
    },
    Comparison {
        before_path: String,
        after_path: String,
        #[serde(default)]
        reference_path: Option<String>,
        #[serde(default)]
        description: String,
    },
    Metric {
        name: String,
        value: serde_json::Value,
        #[serde(default)]
        unit: String,
        #[serde(default)]
        threshold: Option<f64>,
        #[serde(default)]
        higher_is_better: Option<bool>,
    },
    Error {
        message: String,
        #[serde(default)]
        error_type: String,
        #[serde(default)]
        stacktrace: Option<String>,
    },
}

fn default_scale() -> String {
    "A-F".to_string()
}

/// Structured outcome of one trust agent check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustResult {
    pub success: bool,
    pub agent_type: String,
    pub summary: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl TrustResult {
    pub fn new(agent_type: impl Into<String>, success: bool, summary: impl Into<String>) -> Self {
        Self {
            success,
            agent_type: agent_type.into(),
            summary: summary.into(),
            details: BTreeMap::new(),
            components: Vec::new(),
        }
    }

    pub fn passed(agent_type: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(agent_type, true, summary)
    }

    pub fn failed(agent_type: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(agent_type, false, summary)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn with_grade(
        mut self,
        grade: impl Into<String>,
        scale: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.components.push(Component::Grade {
            grade: grade.into(),
            scale: scale.into(),
            description: description.into(),
        });
        self
    }

    pub fn with_report(mut self, title: impl Into<String>, content: impl Into<String>) -> Self {
        self.components.push(Component::Report {
            title: title.into(),
            content: content.into(),
        });
        self
    }

    pub fn with_screenshot(mut self, path: impl Into<String>, description: impl Into<String>) -> Self {
        self.components.push(Component::Screenshot {
            path: path.into(),
            description: description.into(),
            width: None,
            height: None,
        });
        self
    }

    pub fn with_comparison(
        mut self,
        before_path: impl Into<String>,
        after_path: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.components.push(Component::Comparison {
            before_path: before_path.into(),
            after_path: after_path.into(),
            reference_path: None,
            description: description.into(),
        });
        self
    }

    pub fn with_metric(
        mut self,
        name: impl Into<String>,
        value: serde_json::Value,
        unit: impl Into<String>,
    ) -> Self {
        self.components.push(Component::Metric {
            name: name.into(),
            value,
            unit: unit.into(),
            threshold: None,
            higher_is_better: None,
        });
        self
    }

    pub fn with_error(
        mut self,
        error_type: impl Into<String>,
        message: impl Into<String>,
        stacktrace: Option<String>,
    ) -> Self {
        self.components.push(Component::Error {
            message: message.into(),
            error_type: error_type.into(),
            stacktrace,
        });
        self
    }

    pub fn grade(&self) -> Option<&str> {
        self.components.iter().find_map(|c| match c {
            Component::Grade { grade, .. } => Some(grade.as_str()),
            _ => None,
        })
    }

    /// Render to plain text for the console and the execution log.
    pub fn render_console(&self) -> String {
        let mut lines = Vec::new();
        let status = if self.success { "PASS" } else { "FAIL" };
        lines.push(format!("[{status}] {}: {}", self.agent_type, self.summary));
        for component in &self.components {
            lines.push(render_component_console(component));
        }
        lines.join("\n")
    }

    /// Render to a self-contained HTML fragment.
    pub fn render_html(&self) -> String {
        let mut out = String::new();
        let class = if self.success { "result pass" } else { "result fail" };
        out.push_str(&format!(
            "<div class=\"{class}\"><h3>{}: {}</h3>\n",
            escape_html(&self.agent_type),
            escape_html(&self.summary)
        ));
        for component in &self.components {
            out.push_str(&render_component_html(component));
            out.push('\n');
        }
        out.push_str("</div>");
        out
    }
}

fn render_component_console(component: &Component) -> String {
    match component {
        Component::Grade {
            grade,
            scale,
            description,
        } => {
            if description.is_empty() {
                format!("  Grade: {grade} (scale {scale})")
            } else {
                format!("  Grade: {grade} (scale {scale}) - {description}")
            }
        }
        Component::Report { title, content } => {
            let header = if title.is_empty() { "Report" } else { title };
            let body: String = content
                .lines()
                .map(|l| format!("    {l}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("  {header}:\n{body}")
        }
        Component::Screenshot {
            path,
            description,
            width,
            height,
        } => {
            let dims = match (width, height) {
                (Some(w), Some(h)) => format!(" ({w}x{h})"),
                _ => String::new(),
            };
            format!("  Screenshot: {path}{dims} {description}")
        }
        Component::Comparison {
            before_path,
            after_path,
            reference_path,
            description,
        } => {
            let mut line = format!("  Comparison: {before_path} -> {after_path}");
            if let Some(reference) = reference_path {
                line.push_str(&format!(" (reference {reference})"));
            }
            if !description.is_empty() {
                line.push_str(&format!(" - {description}"));
            }
            line
        }
        Component::Metric {
            name, value, unit, ..
        } => format!("  {name}: {value} {unit}").trim_end().to_string(),
        Component::Error {
            message,
            error_type,
            stacktrace,
        } => {
            let mut line = if error_type.is_empty() {
                format!("  Error: {message}")
            } else {
                format!("  Error ({error_type}): {message}")
            };
            if let Some(trace) = stacktrace {
                line.push('\n');
                line.push_str(
                    &trace
                        .lines()
                        .map(|l| format!("    {l}"))
                        .collect::<Vec<_>>()
                        .join("\n"),
                );
            }
            line
        }
    }
}

fn render_component_html(component: &Component) -> String {
    match component {
        Component::Grade {
            grade,
            scale,
            description,
        } => format!(
            "<p class=\"grade\"><b>Grade {}</b> <small>({})</small> {}</p>",
            escape_html(grade),
            escape_html(scale),
            escape_html(description)
        ),
        Component::Report { title, content } => format!(
            "<details open><summary>{}</summary><pre>{}</pre></details>",
            escape_html(if title.is_empty() { "Report" } else { title }),
            escape_html(content)
        ),
        Component::Screenshot { path, description, .. } => format!(
            "<figure><img src=\"{}\" alt=\"{}\"/></figure>",
            escape_html(path),
            escape_html(description)
        ),
        Component::Comparison {
            before_path,
            after_path,
            ..
        } => format!(
            "<div class=\"comparison\"><img src=\"{}\"/><img src=\"{}\"/></div>",
            escape_html(before_path),
            escape_html(after_path)
        ),
        Component::Metric {
            name, value, unit, ..
        } => format!(
            "<p class=\"metric\">{}: <b>{}</b> {}</p>",
            escape_html(name),
            escape_html(&value.to_string()),
            escape_html(unit)
        ),
        Component::Error {
            message,
            error_type,
            stacktrace,
        } => {
            let trace = stacktrace
                .as_deref()
                .map(|t| format!("<pre>{}</pre>", escape_html(t)))
                .unwrap_or_default();
            format!(
                "<p class=\"error\"><b>{}</b> {}</p>{trace}",
                escape_html(error_type),
                escape_html(message)
            )
        }
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn component_type_discriminator() {
        let result = TrustResult::passed("pytest", "all green")
            .with_metric("Passed", json!(12), "tests")
            .with_grade("A", "A-F", "clean diff");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["components"][0]["component_type"], "metric");
        assert_eq!(value["components"][1]["component_type"], "grade");
    }

    #[test]
    fn deserialize_round_trip_preserves_order() {
        let result = TrustResult::failed("vision", "mismatch")
            .with_screenshot("/tmp/a.png", "before")
            .with_error("Timeout", "program never started", None);
        let json = serde_json::to_string(&result).unwrap();
        let back: TrustResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.components.len(), 2);
        assert!(matches!(back.components[0], Component::Screenshot { .. }));
        assert!(matches!(back.components[1], Component::Error { .. }));
    }

    #[test]
    fn console_render_marks_failures() {
        let result = TrustResult::failed("plausibility", "grade too low").with_grade(
            "D",
            "A-F",
            "missing tests",
        );
        let text = result.render_console();
        assert!(text.starts_with("[FAIL] plausibility"));
        assert!(text.contains("Grade: D"));
    }

    #[test]
    fn html_render_escapes() {
        let result =
            TrustResult::passed("plausibility", "<ok>").with_report("diff", "a < b && b > c");
        let html = result.render_html();
        assert!(html.contains("&lt;ok&gt;"));
        assert!(html.contains("a &lt; b &amp;&amp; b &gt; c"));
        assert!(!html.contains("<ok>"));
    }

    #[test]
    fn grade_accessor_finds_first_grade() {
        let result = TrustResult::passed("plausibility", "ok")
            .with_report("r", "body")
            .with_grade("B", "A-F", "");
        assert_eq!(result.grade(), Some("B"));
    }
}
