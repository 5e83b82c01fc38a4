use escriba_core::format::{format_currency, format_long_date};
use escriba_core::CompileContext;

use crate::GenerationRequest;

/// Convert the proposal context to a compact text representation for LLM
/// consumption. Only fields that are present are emitted, so the model
/// never sees empty scaffolding to hallucinate around.
pub fn serialize_context(ctx: &CompileContext) -> String {
    let mut out = String::with_capacity(1024);

    out.push_str("CLIENT:\n");
    out.push('"');
    out.push_str(&ctx.client.group_name);
    out.push('"');
    if let Some(alias) = &ctx.client.alias {
        if !alias.is_empty() {
            out.push_str(" alias \"");
            out.push_str(alias);
            out.push('"');
        }
    }
    if let Some(industry) = &ctx.client.industry {
        out.push_str(" industry=");
        out.push_str(industry);
    }
    if let Some(revenue) = ctx.client.revenue {
        out.push_str(" revenue=");
        out.push_str(&format_currency(revenue));
    }
    if let Some(count) = ctx.client.employee_count {
        out.push_str(&format!(" employees={}", count));
    }
    out.push('\n');
    if let Some(contact) = &ctx.client.contact {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(name) = contact.name.as_deref() {
            parts.push(name);
        }
        if let Some(email) = contact.email.as_deref() {
            parts.push(email);
        }
        if let Some(phone) = contact.phone.as_deref() {
            parts.push(phone);
        }
        if !parts.is_empty() {
            out.push_str("contact: ");
            out.push_str(&parts.join(" / "));
            out.push('\n');
        }
    }

    if !ctx.entities.is_empty() {
        out.push_str("ENTITIES:\n");
        for entity in &ctx.entities {
            out.push_str("- \"");
            out.push_str(&entity.legal_name);
            out.push('"');
            if let Some(rfc) = &entity.rfc {
                out.push_str(" RFC=");
                out.push_str(rfc);
            }
            out.push('\n');
        }
    }

    if !ctx.services.is_empty() {
        out.push_str("SERVICES:\n");
        for service in &ctx.services {
            out.push_str("- \"");
            out.push_str(&service.name);
            out.push('"');
            if let Some(fee) = service.custom_fee {
                out.push_str(" fee=");
                out.push_str(&format_currency(fee));
            }
            if let Some(monthly) = service.monthly_fee {
                out.push_str(" monthly=");
                out.push_str(&format_currency(monthly));
            }
            if let Some(description) = &service.description {
                if !description.is_empty() {
                    out.push_str(" | ");
                    // Truncate long descriptions (char boundary, not bytes)
                    match description.char_indices().nth(120) {
                        Some((cut, _)) => {
                            out.push_str(&description[..cut]);
                            out.push_str("...");
                        }
                        None => out.push_str(description),
                    }
                }
            }
            out.push('\n');
        }
    }

    out.push_str("PROPOSAL:\n");
    if let Some(title) = &ctx.proposal.title {
        out.push('"');
        out.push_str(title);
        out.push_str("\" ");
    }
    if let Some(date) = &ctx.proposal.date {
        out.push_str("date=");
        out.push_str(&format_long_date(date).unwrap_or_else(|| date.clone()));
        out.push(' ');
    }
    if let Some(total) = ctx.proposal.total_fee {
        out.push_str("total=");
        out.push_str(&format_currency(total));
        out.push(' ');
    }
    if let Some(retainer) = ctx.proposal.monthly_retainer {
        out.push_str("retainer=");
        out.push_str(&format_currency(retainer));
        out.push_str("/month");
        if let Some(months) = ctx.proposal.retainer_months {
            out.push_str(&format!(" x {}", months));
        }
        out.push(' ');
    }
    out.push('\n');
    if let Some(background) = &ctx.proposal.background {
        if !background.is_empty() {
            out.push_str("background: ");
            out.push_str(background);
            out.push('\n');
        }
    }

    if let Some(case) = &ctx.case {
        out.push_str("CASE:\n");
        if let Some(title) = &case.title {
            out.push('"');
            out.push_str(title);
            out.push_str("\"\n");
        }
        if let Some(background) = &case.background {
            out.push_str("background: ");
            out.push_str(background);
            out.push('\n');
        }
        if let Some(notes) = &case.notes {
            out.push_str("notes: ");
            out.push_str(notes);
            out.push('\n');
        }
    }

    if let Some(firm) = &ctx.firm {
        out.push_str("FIRM:\n");
        if let Some(name) = &firm.name {
            out.push('"');
            out.push_str(name);
            out.push_str("\"\n");
        }
        if let Some(contact_info) = &firm.contact_info {
            out.push_str("contact: ");
            out.push_str(contact_info);
            out.push('\n');
        }
    }

    out
}

pub fn draft_system() -> String {
    "You are a senior associate at a Mexican law firm drafting sections of a client \
engagement proposal.\n\n\
Rules:\n\
- Write in formal Mexican Spanish legal register (usted form).\n\
- Use only facts present in the CONTEXT section. Never invent fees, dates, names \
or scope that the context does not state.\n\
- When the instructions reference fees or retainers, quote the amounts exactly as \
given in the context.\n\
- Output the section body as clean HTML paragraphs (<p>...</p>, <ul>/<li> where a \
list reads better). No headings, no <html> or <body> wrapper, no markdown, no \
code fences.\n\
- Keep the section self-contained: it is inserted into a larger document between \
other sections.\n\
- If the context lacks what the instructions need, write around the gap in general \
terms instead of fabricating specifics."
        .to_string()
}

pub fn draft_user(request: &GenerationRequest) -> String {
    let mut out = String::with_capacity(512);
    out.push_str("INSTRUCTIONS:\n");
    out.push_str(&request.instructions);
    out.push('\n');
    if !request.placeholder.trim().is_empty() {
        out.push_str("\nCURRENT PLACEHOLDER (replace entirely):\n");
        out.push_str(&request.placeholder);
        out.push('\n');
    }
    out.push_str("\nCONTEXT:\n");
    out.push_str(&request.context);
    out
}

pub fn rewrite_system() -> String {
    "You revise text from a law firm's client proposal. Apply the user's \
instruction to the original text and return ONLY the revised text, preserving \
its language (Spanish stays Spanish), its HTML structure if any, and all facts \
the instruction does not ask you to change. No commentary, no markdown fences."
        .to_string()
}

pub fn rewrite_user(original: &str, instruction: &str, context: Option<&str>) -> String {
    let mut out = String::with_capacity(512);
    out.push_str("INSTRUCTION:\n");
    out.push_str(instruction);
    out.push_str("\n\nORIGINAL TEXT:\n");
    out.push_str(original);
    if let Some(context) = context {
        if !context.trim().is_empty() {
            out.push_str("\n\nCONTEXT:\n");
            out.push_str(context);
        }
    }
    out
}

pub fn analyze_system() -> String {
    "You segment an existing law-firm document into template blocks.\n\n\
Block types:\n\
- \"static\": boilerplate that reads the same for every client.\n\
- \"variable\": a span that should be data-bound. Set \"source\" to one of the \
known context paths below and put the span's current text in \"content\" as the \
placeholder.\n\
- \"dynamic\": client-specific prose an assistant should redraft per proposal. \
Put drafting instructions for it in \"instructions\".\n\n\
Known context paths: client.group_name, client.alias, client.industry, \
client.revenue, client.employee_count, client.contact.name, client.contact.email, \
client.contact.phone, proposal.date, proposal.title, proposal.background, \
proposal.total_fee, proposal.monthly_retainer, proposal.retainer_months, \
case.title, case.background, case.notes, firm.name, firm.contact_info.\n\n\
Output ONLY a JSON array, in document order. Each item: \
{\"type\":\"static\"|\"variable\"|\"dynamic\",\"content\":\"<text>\",\
\"variableName\":\"<label>\",\"source\":\"<context path>\",\
\"instructions\":\"<drafting instructions>\",\"confidence\":0.0-1.0}. \
Omit fields that do not apply to the type. \"confidence\" is how sure you are \
about the chosen type; use low values when guessing. \
Output ONLY the JSON array, nothing else."
        .to_string()
}

pub fn analyze_user(document: &str) -> String {
    format!("DOCUMENT:\n{}", document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use escriba_core::{ClientInfo, CompileContext, EntityInfo, ProposalInfo, ServiceInfo};

    fn sample() -> CompileContext {
        CompileContext {
            client: ClientInfo {
                group_name: "Grupo Industrial ABC".to_string(),
                industry: Some("Manufactura".to_string()),
                employee_count: Some(240),
                ..Default::default()
            },
            entities: vec![EntityInfo {
                legal_name: "ABC Holding SA de CV".to_string(),
                rfc: Some("AHO010203XY9".to_string()),
            }],
            services: vec![ServiceInfo {
                name: "Auditoría fiscal".to_string(),
                custom_fee: Some(95000.0),
                ..Default::default()
            }],
            proposal: ProposalInfo {
                date: Some("2026-08-05".to_string()),
                total_fee: Some(185000.0),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn context_serialization_names_sections_and_formats_money() {
        let text = serialize_context(&sample());
        assert!(text.contains("CLIENT:\n\"Grupo Industrial ABC\""));
        assert!(text.contains("employees=240"));
        assert!(text.contains("RFC=AHO010203XY9"));
        assert!(text.contains("fee=$95,000.00"));
        assert!(text.contains("total=$185,000.00"));
        assert!(text.contains("date=5 de agosto de 2026"));
    }

    #[test]
    fn absent_sections_are_omitted() {
        let text = serialize_context(&CompileContext::default());
        assert!(!text.contains("ENTITIES:"));
        assert!(!text.contains("SERVICES:"));
        assert!(!text.contains("CASE:"));
        assert!(!text.contains("FIRM:"));
    }

    #[test]
    fn draft_user_includes_placeholder_only_when_present() {
        let with = GenerationRequest {
            block_id: "b3".to_string(),
            instructions: "Redacta antecedentes".to_string(),
            placeholder: "[Antecedentes]".to_string(),
            context: "CLIENT:\n\"ACME\"\n".to_string(),
        };
        let text = draft_user(&with);
        assert!(text.contains("CURRENT PLACEHOLDER"));
        assert!(text.contains("[Antecedentes]"));

        let without = GenerationRequest {
            placeholder: String::new(),
            ..with
        };
        assert!(!draft_user(&without).contains("CURRENT PLACEHOLDER"));
    }
}
