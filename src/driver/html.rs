use crate::cvwatch::util::collapse_whitespace;
use crate::driver::{Activation, DriverError, HtmlTable, Locator, PageDriver, TablePredicate};
use reqwest::Url;
use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("cvwatch/", env!("CARGO_PKG_VERSION"));
const CONTROL_SELECTOR: &str =
    "a, button, input[type='submit'], input[type='button'], [role='button']";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FormSubmission {
    action: Option<String>,
    method: FormMethod,
    fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Link(String),
    Form(FormSubmission),
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub url: String,
    pub id_field: String,
    pub password_field: String,
    pub login_id: String,
    pub password: String,
}

/// Where a login attempt ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginLanding {
    pub url: Url,
    /// The landed document still asks for a password.
    pub password_form: bool,
}

fn selector(css: &str) -> Result<Selector, DriverError> {
    Selector::parse(css).map_err(|e| DriverError::Document(format!("invalid selector {css:?}: {e}")))
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

fn nearest_ancestor<'a>(el: ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == tag)
}

fn owned_by(row: ElementRef<'_>, table: ElementRef<'_>) -> bool {
    nearest_ancestor(row, "table").is_some_and(|owner| owner.id() == table.id())
}

fn has_class(el: ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c.eq_ignore_ascii_case(class))
}

fn is_hidden(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if value.attr("hidden").is_some() {
        return true;
    }
    if value
        .attr("type")
        .is_some_and(|kind| kind.eq_ignore_ascii_case("hidden"))
    {
        return true;
    }
    let Some(style) = value.attr("style") else {
        return false;
    };
    let mut style: String = style
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    style.push(';');
    [
        "display:none",
        "visibility:hidden",
        "width:0;",
        "width:0px;",
        "height:0;",
        "height:0px;",
    ]
    .iter()
    .any(|rule| style.contains(rule))
}

fn hidden_in_tree(el: ElementRef<'_>) -> bool {
    is_hidden(el)
        || el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(is_hidden)
}

fn is_disabled(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if value.attr("disabled").is_some()
        || value
            .attr("aria-disabled")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        || has_class(el, "disabled")
    {
        return true;
    }
    el.parent()
        .and_then(ElementRef::wrap)
        .is_some_and(|parent| has_class(parent, "disabled"))
}

fn control_label(el: ElementRef<'_>) -> String {
    let value = el.value();
    if value.name() == "input" {
        return collapse_whitespace(value.attr("value").unwrap_or_default());
    }
    let text = element_text(el);
    if text.is_empty() {
        value
            .attr("aria-label")
            .map(collapse_whitespace)
            .unwrap_or_default()
    } else {
        text
    }
}

pub fn parse_tables(html: &str) -> Result<Vec<HtmlTable>, DriverError> {
    let document = Html::parse_document(html);
    let tables = selector("table")?;
    let rows = selector("tr")?;
    let cells = selector("th, td")?;
    Ok(document
        .select(&tables)
        .map(|table| read_table(table, &rows, &cells))
        .collect())
}

fn read_table(table: ElementRef<'_>, rows: &Selector, cells: &Selector) -> HtmlTable {
    let mut out = HtmlTable::default();
    for row in table.select(rows).filter(|row| owned_by(*row, table)) {
        if is_hidden(row) {
            continue;
        }
        let row_cells: Vec<ElementRef<'_>> = row
            .select(cells)
            .filter(|cell| cell.parent().is_some_and(|parent| parent.id() == row.id()))
            .collect();
        if row_cells.is_empty() {
            continue;
        }
        let header_row = row_cells.iter().all(|cell| cell.value().name() == "th");
        let texts: Vec<String> = row_cells.into_iter().map(element_text).collect();
        if header_row {
            if out.headers.is_empty() && out.rows.is_empty() {
                out.headers = texts;
            }
            continue;
        }
        out.rows.push(texts);
    }
    out
}

fn usable_href(href: &str) -> Option<&str> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.to_ascii_lowercase().starts_with("javascript:")
    {
        return None;
    }
    Some(href)
}

fn submits_form(el: ElementRef<'_>) -> bool {
    let value = el.value();
    let kind = value.attr("type").map(str::to_ascii_lowercase);
    match value.name() {
        "button" => !matches!(kind.as_deref(), Some("button") | Some("reset")),
        "input" => matches!(kind.as_deref(), Some("submit") | Some("image")),
        _ => false,
    }
}

fn activation_target(el: ElementRef<'_>) -> Option<Target> {
    let value = el.value();
    match value.name() {
        "a" | "link" => usable_href(value.attr("href")?).map(|href| Target::Link(href.to_string())),
        "button" | "input" => {
            if !submits_form(el) {
                return None;
            }
            let form = nearest_ancestor(el, "form")?;
            Some(Target::Form(form_submission(form, Some(el))))
        }
        _ => el
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|inner| inner.value().name() == "a")
            .and_then(activation_target),
    }
}

fn selected_option(select: ElementRef<'_>) -> Option<String> {
    let options: Vec<ElementRef<'_>> = select
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "option")
        .collect();
    let chosen = options
        .iter()
        .find(|option| option.value().attr("selected").is_some())
        .or_else(|| options.first())?;
    Some(match chosen.value().attr("value") {
        Some(value) => value.to_string(),
        None => element_text(*chosen),
    })
}

fn form_submission(form: ElementRef<'_>, submitter: Option<ElementRef<'_>>) -> FormSubmission {
    let mut fields = Vec::new();
    for el in form.descendants().filter_map(ElementRef::wrap) {
        let value = el.value();
        let Some(name) = value.attr("name") else {
            continue;
        };
        match value.name() {
            "input" => {
                let kind = value.attr("type").unwrap_or("text").to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "image" | "reset" | "file" => continue,
                    "checkbox" | "radio" if value.attr("checked").is_none() => continue,
                    _ => {}
                }
                let fallback = if matches!(kind.as_str(), "checkbox" | "radio") {
                    "on"
                } else {
                    ""
                };
                fields.push((
                    name.to_string(),
                    value.attr("value").unwrap_or(fallback).to_string(),
                ));
            }
            "select" => {
                if let Some(selected) = selected_option(el) {
                    fields.push((name.to_string(), selected));
                }
            }
            "textarea" => fields.push((name.to_string(), el.text().collect())),
            _ => {}
        }
    }

    if let Some(submitter) = submitter {
        if let Some(name) = submitter.value().attr("name") {
            let value = submitter.value().attr("value").unwrap_or_default();
            fields.push((name.to_string(), value.to_string()));
        }
    }

    let action = submitter
        .and_then(|s| s.value().attr("formaction"))
        .or_else(|| form.value().attr("action"))
        .map(str::trim)
        .filter(|action| !action.is_empty())
        .map(ToOwned::to_owned);
    let method = submitter
        .and_then(|s| s.value().attr("formmethod"))
        .or_else(|| form.value().attr("method"))
        .filter(|m| m.trim().eq_ignore_ascii_case("post"))
        .map_or(FormMethod::Get, |_| FormMethod::Post);

    FormSubmission {
        action,
        method,
        fields,
    }
}

fn locate(document: &Html, locator: &Locator) -> Result<Option<Target>, DriverError> {
    match locator {
        Locator::Selector(css) => {
            let sel = selector(css)?;
            Ok(document.select(&sel).find_map(activation_target))
        }
        Locator::Label(labels) => {
            let sel = selector(CONTROL_SELECTOR)?;
            Ok(document
                .select(&sel)
                .filter(|el| labels.contains(&control_label(*el).as_str()))
                .filter(|el| !is_disabled(*el) && !hidden_in_tree(*el))
                .find_map(activation_target))
        }
    }
}

fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
    match fields.iter_mut().find(|(key, _)| key == name) {
        Some(slot) => slot.1 = value.to_string(),
        None => fields.push((name.to_string(), value.to_string())),
    }
}

fn password_form(document: &Html) -> Result<Option<ElementRef<'_>>, DriverError> {
    let forms = selector("form")?;
    let password = selector("input[type='password']")?;
    Ok(document
        .select(&forms)
        .find(|form| form.select(&password).next().is_some()))
}

pub fn has_password_form(html: &str) -> Result<bool, DriverError> {
    Ok(password_form(&Html::parse_document(html))?.is_some())
}

fn login_submission(
    html: &str,
    request: &LoginRequest,
) -> Result<Option<FormSubmission>, DriverError> {
    let document = Html::parse_document(html);
    let Some(form) = password_form(&document)? else {
        return Ok(None);
    };

    let mut submission = form_submission(form, None);
    set_field(&mut submission.fields, &request.id_field, &request.login_id);
    set_field(&mut submission.fields, &request.password_field, &request.password);
    Ok(Some(submission))
}

pub struct HtmlDriver {
    client: Client,
    poll_interval: Duration,
    current_url: Option<Url>,
    body: String,
}

impl HtmlDriver {
    pub fn new(poll_interval: Duration) -> Result<Self, DriverError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            poll_interval,
            current_url: None,
            body: String::new(),
        })
    }

    #[cfg(test)]
    pub fn current_url(&self) -> Option<&Url> {
        self.current_url.as_ref()
    }

    pub fn open(&mut self, url: &str) -> Result<(), DriverError> {
        let parsed = Url::parse(url)
            .map_err(|e| DriverError::Document(format!("invalid url {url:?}: {e}")))?;
        self.load(parsed, None)
    }

    /// Submit the first password form on `request.url` and report where the
    /// session landed. Judging success is left to the caller.
    pub fn login(&mut self, request: &LoginRequest) -> Result<LoginLanding, DriverError> {
        self.open(&request.url)?;
        let submission = login_submission(&self.body, request)?.ok_or_else(|| {
            DriverError::Document(format!(
                "no login form with a password field at {}",
                request.url
            ))
        })?;
        self.submit(submission)?;
        let url = self
            .current_url
            .clone()
            .ok_or_else(|| DriverError::Document("no document loaded after login".to_string()))?;
        Ok(LoginLanding {
            url,
            password_form: has_password_form(&self.body)?,
        })
    }

    fn resolve(&self, href: &str) -> Result<Url, DriverError> {
        let parsed = match &self.current_url {
            Some(base) => base.join(href),
            None => Url::parse(href),
        };
        parsed.map_err(|e| DriverError::Document(format!("cannot resolve {href:?}: {e}")))
    }

    fn submit(&mut self, form: FormSubmission) -> Result<(), DriverError> {
        let mut url = match &form.action {
            Some(action) => self.resolve(action)?,
            None => self.current_url.clone().ok_or_else(|| {
                DriverError::Document("form submitted before any document was loaded".to_string())
            })?,
        };
        match form.method {
            FormMethod::Get => {
                url.query_pairs_mut().clear().extend_pairs(
                    form.fields
                        .iter()
                        .map(|(key, value)| (key.as_str(), value.as_str())),
                );
                self.load(url, None)
            }
            FormMethod::Post => self.load(url, Some(form.fields.as_slice())),
        }
    }

    fn reload(&mut self) -> Result<(), DriverError> {
        let Some(url) = self.current_url.clone() else {
            return Ok(());
        };
        self.load(url, None)
    }

    fn load(&mut self, url: Url, form: Option<&[(String, String)]>) -> Result<(), DriverError> {
        if url.scheme() == "file" {
            if form.is_some() {
                return Err(DriverError::Document(format!("cannot post a form to {url}")));
            }
            let path = url
                .to_file_path()
                .map_err(|_| DriverError::Document(format!("not a local file url: {url}")))?;
            self.body = fs::read_to_string(&path)?;
            debug!(url = %url, bytes = self.body.len(), "document loaded");
            self.current_url = Some(url);
            return Ok(());
        }

        let request = match form {
            Some(fields) => self.client.post(url.clone()).form(fields),
            None => self.client.get(url.clone()),
        };
        let response = request.send()?;
        let status = response.status();
        let final_url = response.url().clone();
        if !status.is_success() {
            return Err(DriverError::Http {
                status: status.as_u16(),
                url: final_url.to_string(),
            });
        }
        self.body = response.text()?;
        debug!(url = %final_url, bytes = self.body.len(), "document loaded");
        self.current_url = Some(final_url);
        Ok(())
    }
}

impl PageDriver for HtmlDriver {
    fn tables(&mut self) -> Result<Vec<HtmlTable>, DriverError> {
        parse_tables(&self.body)
    }

    fn wait_for(
        &mut self,
        predicate: TablePredicate<'_>,
        timeout: Duration,
    ) -> Result<bool, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.tables()?) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
            self.reload()?;
        }
    }

    /// A control that lands on a new address counts as navigated. One that
    /// reloads the same address (a postback pager) is given `timeout` for
    /// `settled` to hold, re-fetching at the poll interval.
    fn activate(
        &mut self,
        locator: &Locator,
        settled: TablePredicate<'_>,
        timeout: Duration,
    ) -> Result<Activation, DriverError> {
        let target = locate(&Html::parse_document(&self.body), locator)?;
        let Some(target) = target else {
            return Ok(Activation::NotFound);
        };
        debug!(?locator, ?target, "activating pager control");
        let before = self.current_url.clone();
        match target {
            Target::Link(href) => {
                let url = self.resolve(&href)?;
                self.load(url, None)?;
            }
            Target::Form(form) => self.submit(form)?,
        }
        if self.current_url != before {
            return Ok(Activation::Navigated);
        }
        if self.wait_for(settled, timeout)? {
            Ok(Activation::Settled)
        } else {
            Ok(Activation::TimedOut)
        }
    }
}
