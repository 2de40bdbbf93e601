use colored::*;
use protodesk_core::form::FormState;
use protodesk_core::project::ProjectState;
use protodesk_core::schema::SchemaNode;

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

pub struct Tree<'a>(pub &'a [SchemaNode]);

pub struct FormList<'a>(pub &'a ProjectState);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<anyhow::Error> for FormattedString {
    fn from(err: anyhow::Error) -> Self {
        FormattedString(format!("{}\n\n'{:#}'", "Error:".red().bold(), err))
    }
}

impl From<Tree<'_>> for FormattedString {
    fn from(Tree(nodes): Tree<'_>) -> Self {
        if nodes.is_empty() {
            return FormattedString("No schema loaded.".yellow().to_string());
        }

        let mut out = String::new();
        for namespace in nodes {
            out.push_str(&format!("{}\n", namespace.label.cyan()));
            for service in &namespace.children {
                out.push_str(&format!("  {} {}\n", "service".cyan(), service.id.green()));
                for method in &service.children {
                    out.push_str(&format!("    {} {}\n", "rpc".cyan(), method.id));
                }
            }
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<FormList<'_>> for FormattedString {
    fn from(FormList(state): FormList<'_>) -> Self {
        let mut out = String::new();
        for form in &state.forms {
            let marker = if form.id == state.current_form_id {
                "*".green().bold().to_string()
            } else {
                " ".to_string()
            };
            let method = form.selected_method_id.as_deref().unwrap_or("-");
            out.push_str(&format!(
                "{marker} {} {} {}\n",
                form.id.to_string().yellow(),
                form.address,
                method
            ));
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<&FormState> for FormattedString {
    fn from(form: &FormState) -> Self {
        let mut out = String::new();
        out.push_str(&format!("{} {}\n", "form".cyan(), form.id.to_string().yellow()));
        out.push_str(&format!("{} {}\n", "address".cyan(), form.address));
        out.push_str(&format!(
            "{} {}\n",
            "method".cyan(),
            form.selected_method_id.as_deref().unwrap_or("-")
        ));

        for header in &form.headers {
            out.push_str(&format!(
                "{} {} {}: {}\n",
                "header".cyan(),
                header.id.to_string().purple(),
                header.key,
                header.value
            ));
        }

        out.push_str(&format!("{}\n{}\n", "request".cyan(), form.request_text));
        if !form.response_text.is_empty() {
            out.push_str(&format!("{}\n{}\n", "response".cyan(), form.response_text));
        }
        FormattedString(out.trim_end().to_string())
    }
}
