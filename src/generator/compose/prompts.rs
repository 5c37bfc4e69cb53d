//! 文档阶段的提示词

pub fn outline(request: &str, title: &str) -> String {
    format!(
        r#"Design a detailed outline for the document "{title}" of the development plan for this project:

{request}

Base the outline on the research in the context below. For every section list:
- the section heading (Markdown `##` / `###`)
- 3-6 bullet points describing what the section must cover
- the code examples, configuration files or diagrams it must include

Cover the full path from setup to production for the scope of this document. Return only the outline in Markdown."#
    )
}

/// 规划模型不可用时的默认大纲
pub fn default_outline(title: &str) -> String {
    format!(
        "# {title}\n\n\
         ## Overview\n- Goals and scope of this document\n\n\
         ## Architecture\n- Components and how they interact\n\n\
         ## Implementation\n- Step-by-step instructions with complete code examples\n\n\
         ## Configuration\n- Required configuration files and environment variables\n\n\
         ## Testing & Deployment\n- How to verify and ship the result\n"
    )
}

pub fn condensed_summary(request: &str, title: &str, max_tokens: usize) -> String {
    format!(
        r#"Condense the research in the context below into a briefing for a technical writer who will author "{title}" for this project:

{request}

Keep only facts relevant to this document: recommended technologies with versions, concrete implementation steps, configuration details, pitfalls and source URLs worth citing.
Stay under {max_tokens} tokens. Use terse bullet points grouped by topic."#
    )
}

pub fn author(request: &str, plan_number: usize, title: &str, outline: &str, summary: &str, language: &str) -> String {
    format!(
        r#"PROJECT: {request}
DOCUMENT #{plan_number}: {title}

OUTLINE (follow it section by section):
{outline}

RESEARCH SUMMARY (use for technical accuracy and citations):
{summary}

Write the complete document in Markdown.
- Cover every section of the outline, in order
- Give complete, runnable code and configuration files instead of fragments
- Cite sources as [Source: URL] where the research supports a claim
- Finish every section you start; end the document with a short conclusion

{language}"#
    )
}

pub fn review(title: &str, outline: &str, content: &str, research: &str, allow_search: bool) -> String {
    let search_hint = if allow_search {
        "\nIf more research is needed before this document can be approved, add one line per topic in the form:\nSEARCH_NEEDED: <web search query>\n"
    } else {
        ""
    };
    format!(
        r#"Review this implementation guide for TECHNICAL ACCURACY and COMPLETENESS.

DOCUMENT: {title}

ORIGINAL OUTLINE:
{outline}

DOCUMENT CONTENT:
{content}

RESEARCH CONTEXT (for verification):
{research}

Check outline adherence, technical accuracy, code quality, citations and missing configuration.

Start your answer with the overall assessment on its own line: APPROVED if the document is ready, otherwise NEEDS REVISION.
Then list the technical corrections, missing content and 3-5 concrete improvements.
{search_hint}"#
    )
}

pub fn revision(title: &str, outline: &str, content: &str, feedback: &str, language: &str) -> String {
    format!(
        r#"Revise this implementation guide based on the technical review below.

DOCUMENT: {title}

ORIGINAL OUTLINE:
{outline}

CURRENT DOCUMENT:
{content}

REVIEW FEEDBACK:
{feedback}

Return the complete revised document in Markdown, not a diff.
- Fix every inaccuracy the review names
- Add every missing section, example and configuration file
- Keep the parts the review did not criticise

{language}"#
    )
}
