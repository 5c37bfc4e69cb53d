//! 研究阶段的提示词

pub fn research_plan(request: &str, max_queries: usize) -> String {
    format!(
        r#"Break down the following software project request into focused web search queries.

PROJECT REQUEST:
{request}

Produce between 10 and {max_queries} queries that together cover:
- architecture patterns and reference designs for this kind of system
- recommended technology stacks, frameworks and libraries
- implementation details, tutorials and step-by-step guides
- security, testing, deployment and operations practices
- API design and third-party integrations

Return ONLY a JSON object of the form:
```json
{{"queries": ["query one", "query two"]}}
```"#,
        max_queries = max_queries.max(10)
    )
}

pub fn chunk_analysis(request: &str, chunk: usize, total: usize) -> String {
    format!(
        r#"You are analysing batch {chunk} of {total} of web research gathered for this project:

{request}

Using the sources in the context below, extract:
1. Key technical findings and recommendations
2. Technology choices with their trade-offs
3. Implementation patterns and concrete steps
4. Risks, pitfalls and security concerns

Cite source numbers where relevant. Use bullet points."#
    )
}

pub fn synthesis(request: &str, partial_count: usize) -> String {
    format!(
        r#"Synthesise the {partial_count} partial research analyses in the context below into one unified analysis for this project:

{request}

Structure the result as:
## Recommended Architecture
## Technology Stack
## Implementation Approach
## Security & Operations
## Key Insights
List the most important, specific and actionable findings as bullet points under "Key Insights", one finding per line.
Resolve contradictions between batches and ignore batches that report errors."#
    )
}
