use std::io::Stdout;

use chrono::{DateTime, Utc};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};
use ratatui::{Frame, Terminal};

use crate::app::{App, InputMode};
use crate::list::ListState;
use crate::model::{DetailKind, Screen, Service, format_size};
use crate::viewport::visible_range;

pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);

/// Header line, footer line, the list block's borders and its column header.
const LIST_CHROME_ROWS: u16 = 5;

/// Rows a list can show on a terminal of the given height.
pub fn list_rows(terminal_height: u16) -> usize {
    terminal_height.saturating_sub(LIST_CHROME_ROWS).max(1) as usize
}

pub fn render(frame: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);

    if app.info().is_some() {
        render_info_modal(frame, app);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let left_line = build_left_header_line(app);
    let right_line = build_right_header_line(app);
    let right_width = spans_width(&right_line.spans) as u16;
    if area.width < 42 || right_width == 0 || right_width >= area.width {
        frame.render_widget(
            Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(right_line).style(Style::default().bg(BG)),
        chunks[1],
    );
}

fn build_left_header_line(app: &App) -> Line<'static> {
    let mut spans = Vec::new();
    push_powerline_segment(
        &mut spans,
        format!(" 󰅟 {} ", app.context().region),
        Color::White,
        PL_A,
        PL_B,
    );
    push_powerline_segment(
        &mut spans,
        format!(" {} ", compact_text(&app.context().label(), 36)),
        Color::White,
        PL_B,
        PL_C,
    );
    let screen = if app.screen() == Screen::Help {
        format!(" Help · {} ", app.help_return().title())
    } else {
        format!(" {} ", screen_breadcrumb(app))
    };
    push_powerline_segment(&mut spans, screen, Color::White, PL_C, BG);
    Line::from(spans)
}

fn screen_breadcrumb(app: &App) -> String {
    match app.screen() {
        Screen::ObjectBrowse => {
            let bucket = app.bucket().unwrap_or("-");
            compact_text(&format!("s3://{bucket}/{}", app.prefix()), 48)
        }
        Screen::ResourceDetail(DetailKind::Object) => app
            .object_detail()
            .map(|detail| compact_text(&format!("s3://{}/{}", detail.bucket, detail.key), 48))
            .unwrap_or_else(|| "Object".to_string()),
        screen => screen.title().to_string(),
    }
}

fn build_right_header_line(app: &App) -> Line<'static> {
    let mut spans = Vec::new();
    let mut next_bg = BG;
    if app.loading() {
        push_powerline_segment_rtl(
            &mut spans,
            format!(" 󰔟 {} ", app.in_flight()),
            Color::Black,
            WARN,
            next_bg,
        );
        next_bg = WARN;
    }
    if app.auto_refresh() {
        push_powerline_segment_rtl(&mut spans, " 󰑐 auto ", Color::Black, ACCENT, next_bg);
        next_bg = ACCENT;
    }
    if app.selection_len() > 0 {
        push_powerline_segment_rtl(
            &mut spans,
            format!(" 󰄲 {} ", app.selection_len()),
            Color::White,
            PL_C,
            next_bg,
        );
        next_bg = PL_C;
    }
    if !spans.is_empty() {
        spans.push(Span::styled(" ", Style::default().bg(next_bg)));
    }
    Line::from(spans)
}

fn render_body(frame: &mut Frame, area: Rect, app: &mut App) {
    match app.screen() {
        Screen::AuthSelect => {
            let list = app.auth_methods();
            let rows = visible_rows(list, area, |method| vec![method.title().to_string()]);
            render_list(frame, area, "Authentication", &["METHOD"], list, rows);
        }
        Screen::AccountSelect => {
            let list = app.accounts();
            let rows = visible_rows(list, area, |target| {
                vec![
                    target.account_name.clone(),
                    target.account_id.clone(),
                    target.role_name.clone(),
                    target.email.clone(),
                ]
            });
            render_list(
                frame,
                area,
                "Accounts",
                &["ACCOUNT", "ID", "ROLE", "EMAIL"],
                list,
                rows,
            );
        }
        Screen::RegionSelect => {
            let current = app.context().region.clone();
            let list = app.regions();
            let rows = visible_rows(list, area, |region| {
                let marker = if region.0 == current { "●" } else { "" };
                vec![region.0.clone(), marker.to_string()]
            });
            render_list(frame, area, "Regions", &["REGION", "ACTIVE"], list, rows);
        }
        Screen::ResourceList(Service::Ec2) => {
            let list = app.instances();
            let rows = visible_rows(list, area, |instance| {
                vec![
                    selection_marker(app.is_selected(&instance.id)),
                    instance.id.clone(),
                    instance.name.clone(),
                    instance.state.clone(),
                    instance.instance_type.clone(),
                    instance.availability_zone.clone(),
                    dash_if_empty(&instance.public_ip),
                    dash_if_empty(&instance.private_ip),
                ]
            });
            render_list(
                frame,
                area,
                "EC2 Instances",
                &["", "ID", "NAME", "STATE", "TYPE", "AZ", "PUBLIC IP", "PRIVATE IP"],
                list,
                rows,
            );
        }
        Screen::ResourceList(Service::S3) => {
            let list = app.buckets();
            let rows = visible_rows(list, area, |bucket| {
                vec![
                    bucket.name.clone(),
                    dash_if_empty(&bucket.region),
                    format_time(bucket.created),
                ]
            });
            render_list(
                frame,
                area,
                "S3 Buckets",
                &["NAME", "REGION", "CREATED"],
                list,
                rows,
            );
        }
        Screen::ResourceList(Service::Eks) => {
            let list = app.clusters();
            let rows = visible_rows(list, area, |cluster| {
                vec![
                    cluster.name.clone(),
                    dash_if_empty(&cluster.version),
                    dash_if_empty(&cluster.status),
                    dash_if_empty(&cluster.region),
                ]
            });
            render_list(
                frame,
                area,
                "EKS Clusters",
                &["NAME", "VERSION", "STATUS", "REGION"],
                list,
                rows,
            );
        }
        Screen::ObjectBrowse => {
            let prefix = app.prefix().to_string();
            let list = app.objects();
            let rows = visible_rows(list, area, |object| {
                let (icon, size) = if object.is_folder {
                    ("󰉋", "-".to_string())
                } else {
                    ("󰈔", format_size(object.size))
                };
                vec![
                    format!("{icon} {}", object.display_name(&prefix)),
                    size,
                    format_time(object.last_modified),
                    dash_if_empty(&object.storage_class),
                ]
            });
            let title = if list.pagination().truncated {
                "Objects (more: n)"
            } else {
                "Objects"
            };
            render_list(
                frame,
                area,
                title,
                &["KEY", "SIZE", "MODIFIED", "CLASS"],
                list,
                rows,
            );
        }
        Screen::ResourceDetail(kind) => {
            let (title, lines) = detail_lines(app, kind);
            render_scrollable(frame, area, app, &title, lines);
        }
        Screen::Help => {
            render_scrollable(frame, area, app, "Help", help_lines(app));
        }
    }
}

/// Formats only the rows inside the scroll window.
fn visible_rows<T: Clone>(
    list: &ListState<T>,
    area: Rect,
    columns: impl Fn(&T) -> Vec<String>,
) -> Vec<Vec<String>> {
    let height = area.height.saturating_sub(3).max(1) as usize;
    let range = visible_range(list.offset(), list.len(), height);
    list.active()[range].iter().map(columns).collect()
}

fn render_list<T: Clone>(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    headers: &[&str],
    list: &ListState<T>,
    rows: Vec<Vec<String>>,
) {
    let header_row = Row::new(headers.iter().map(|header| {
        Cell::from(header.to_string()).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let body = rows.iter().map(|columns| {
        Row::new(
            columns
                .iter()
                .map(|column| Cell::from(column.clone()).style(Style::default().fg(Color::White))),
        )
    });

    let counter = if list.is_filtered() {
        format!("{} ({}/{})", title, list.len(), list.items().len())
    } else {
        format!("{} ({})", title, list.len())
    };
    let block = Block::default()
        .title(counter)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .style(Style::default().bg(PANEL));

    let table = Table::new(body, column_constraints(headers))
        .header(header_row)
        .block(block)
        .column_spacing(1)
        .row_highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("󰜴 ");

    let mut state = TableState::default();
    if !list.is_empty() {
        state.select(Some(list.selected_index().saturating_sub(list.offset())));
    }
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_scrollable(
    frame: &mut Frame,
    area: Rect,
    app: &mut App,
    title: &str,
    lines: Vec<Line<'static>>,
) {
    let inner_height = area.height.saturating_sub(2) as usize;
    app.set_scroll_extent(lines.len().saturating_sub(inner_height));
    let scroll = u16::try_from(app.scroll()).unwrap_or(u16::MAX);

    let block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT))
        .style(Style::default().bg(PANEL));
    let paragraph = Paragraph::new(Text::from(lines))
        .block(block)
        .style(Style::default().fg(Color::White))
        .scroll((scroll, 0));
    frame.render_widget(paragraph, area);
}

fn detail_lines(app: &App, kind: DetailKind) -> (String, Vec<Line<'static>>) {
    let mut lines = Vec::new();
    match kind {
        DetailKind::Instance => {
            let Some(bundle) = app.instance_detail() else {
                return ("Instance".to_string(), vec![muted_line("Loading…")]);
            };
            if let Some(error) = &bundle.error {
                lines.push(error_line(error));
                lines.push(Line::from(""));
            }
            if let Some(details) = &bundle.details {
                let instance = &details.instance;
                lines.push(section_line("Instance"));
                lines.push(field_line("id", &instance.id));
                lines.push(field_line("name", &instance.name));
                lines.push(field_line("state", &instance.state));
                lines.push(field_line("type", &instance.instance_type));
                lines.push(field_line("zone", &instance.availability_zone));
                lines.push(field_line("public ip", &instance.public_ip));
                lines.push(field_line("private ip", &instance.private_ip));
                lines.push(field_line("launched", &format_time(instance.launch_time)));
                lines.push(field_line("vpc", &details.vpc_id));
                lines.push(field_line("subnet", &details.subnet_id));
                lines.push(field_line("key pair", &details.key_name));
                lines.push(field_line("arch", &details.architecture));
                lines.push(field_line("platform", &details.platform));
                lines.push(field_line("iam profile", &details.iam_profile));
                lines.push(field_line("sec groups", &details.security_groups.join(", ")));
                if !instance.tags.is_empty() {
                    lines.push(Line::from(""));
                    lines.push(section_line("Tags"));
                    for tag in &instance.tags {
                        lines.push(field_line(&tag.key, &tag.value));
                    }
                }
            }
            if let Some(status) = &bundle.status {
                lines.push(Line::from(""));
                lines.push(section_line("Status checks"));
                lines.push(field_line("instance", &status.instance_state));
                lines.push(field_line("system", &status.system_status));
                lines.push(field_line("reachability", &status.instance_status));
            }
            lines.push(Line::from(""));
            lines.push(section_line("SSM agent"));
            match &bundle.ssm {
                Some(agent) => {
                    let state = if agent.connected { "connected" } else { "not connected" };
                    lines.push(field_line("agent", state));
                    lines.push(field_line("ping", &agent.ping_status));
                    lines.push(field_line("version", &agent.agent_version));
                    lines.push(field_line("platform", &agent.platform));
                }
                None => lines.push(muted_line("  no SSM registration")),
            }
            if let Some(metrics) = &bundle.metrics {
                lines.push(Line::from(""));
                lines.push(section_line(&format!(
                    "Metrics (last {} min)",
                    metrics.window_minutes
                )));
                let bytes = |value: Option<f64>| value.map(|value| format_size(value as i64));
                let cpu = metrics.cpu_percent.map(|cpu| format!("{cpu:.1}%"));
                let checks = metrics
                    .status_check_failed
                    .map(|failed| if failed > 0.0 { "failing" } else { "passing" }.to_string());
                for (label, value) in [
                    ("cpu", cpu),
                    ("network in", bytes(metrics.network_in_bytes)),
                    ("network out", bytes(metrics.network_out_bytes)),
                    ("disk read", bytes(metrics.disk_read_bytes)),
                    ("disk write", bytes(metrics.disk_write_bytes)),
                    ("status checks", checks),
                ] {
                    lines.push(field_line(label, value.as_deref().unwrap_or("no data")));
                }
            }
            (format!("Instance {}", bundle.instance_id), lines)
        }
        DetailKind::Object => {
            let Some(detail) = app.object_detail() else {
                return ("Object".to_string(), vec![muted_line("Loading…")]);
            };
            lines.push(field_line("bucket", &detail.bucket));
            lines.push(field_line("key", &detail.key));
            lines.push(field_line("size", &format_size(detail.size)));
            lines.push(field_line("modified", &format_time(detail.last_modified)));
            lines.push(field_line("content type", &detail.content_type));
            lines.push(field_line("etag", &detail.etag));
            lines.push(field_line("class", &detail.storage_class));
            if !detail.metadata.is_empty() {
                lines.push(Line::from(""));
                lines.push(section_line("Metadata"));
                for (key, value) in &detail.metadata {
                    lines.push(field_line(key, value));
                }
            }
            ("Object".to_string(), lines)
        }
        DetailKind::Cluster => {
            let Some(bundle) = app.cluster_detail() else {
                return ("Cluster".to_string(), vec![muted_line("Loading…")]);
            };
            if let Some(error) = &bundle.error {
                lines.push(error_line(error));
                lines.push(Line::from(""));
            }
            if let Some(details) = &bundle.details {
                let cluster = &details.cluster;
                lines.push(section_line("Cluster"));
                lines.push(field_line("name", &cluster.name));
                lines.push(field_line("version", &cluster.version));
                lines.push(field_line("platform", &details.platform_version));
                lines.push(field_line("status", &cluster.status));
                lines.push(field_line("endpoint", &cluster.endpoint));
                lines.push(field_line("arn", &cluster.arn));
                lines.push(field_line("role", &details.role_arn));
                lines.push(field_line("vpc", &details.vpc_id));
                lines.push(field_line("subnets", &details.subnet_ids.join(", ")));
                lines.push(field_line("sec groups", &details.security_group_ids.join(", ")));
                lines.push(field_line("created", &format_time(cluster.created)));
            }
            if let Some(groups) = &bundle.node_groups {
                lines.push(Line::from(""));
                lines.push(section_line("Node groups"));
                if groups.is_empty() {
                    lines.push(muted_line("  none"));
                }
                for group in groups {
                    lines.push(field_line(
                        &group.name,
                        &format!(
                            "{}  {}  desired {} (min {}, max {})",
                            group.status,
                            group.instance_types.join(","),
                            group.desired,
                            group.min,
                            group.max
                        ),
                    ));
                }
            }
            if let Some(addons) = &bundle.addons {
                lines.push(Line::from(""));
                lines.push(section_line("Add-ons"));
                if addons.is_empty() {
                    lines.push(muted_line("  none"));
                }
                for addon in addons {
                    lines.push(field_line(
                        &addon.name,
                        &format!("{}  {}", addon.version, addon.status),
                    ));
                }
            }
            (format!("Cluster {}", bundle.cluster_name), lines)
        }
    }
}

fn help_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(format!(
            "cirrus help  mode:{}  region:{}  view:{}",
            help_mode_label(app.mode()),
            app.context().region,
            app.help_return().title()
        )),
        Line::from(""),
        section_line("Navigation"),
        key_line("j k ↑ ↓", "move down / up"),
        key_line("g G", "first / last row"),
        key_line("Ctrl+d Ctrl+u", "half page down / up"),
        key_line("Ctrl+f Ctrl+b", "page down / up"),
        key_line("Enter", "open the selected row"),
        key_line("Esc", "back one level"),
        key_line("Tab", "next service (EC2, S3, EKS)"),
        key_line("c", "switch region"),
        key_line("r", "refresh"),
        key_line("a", "toggle auto refresh"),
        key_line("?", "toggle this help"),
        key_line("q", "quit"),
        Line::from(""),
        section_line("Search and commands"),
        key_line("/", "search the current list"),
        key_line("n N", "next / previous match"),
        key_line(":", "command line (Tab completes)"),
        Line::from(""),
    ];
    match app.help_return() {
        Screen::ResourceList(Service::Ec2) | Screen::ResourceDetail(DetailKind::Instance) => {
            lines.push(section_line("EC2"));
            lines.push(key_line("Space x", "toggle / clear selection"));
            lines.push(key_line("s S", "start / stop"));
            lines.push(key_line("R t", "reboot / terminate"));
            lines.push(key_line("C", "SSM shell session"));
            lines.push(key_line("y", "copy public IP, private IP or id"));
        }
        Screen::ResourceList(Service::S3)
        | Screen::ObjectBrowse
        | Screen::ResourceDetail(DetailKind::Object) => {
            lines.push(section_line("S3"));
            lines.push(key_line("h ←", "parent prefix"));
            lines.push(key_line("n", "next page when not searching"));
            lines.push(key_line("d", "download object"));
            lines.push(key_line("e", "edit object in $EDITOR"));
            lines.push(key_line("p", "presigned URL"));
            lines.push(key_line("v", "bucket versioning"));
            lines.push(key_line("D", "delete (type the name to confirm)"));
        }
        Screen::ResourceList(Service::Eks) | Screen::ResourceDetail(DetailKind::Cluster) => {
            lines.push(section_line("EKS"));
            lines.push(key_line("K", "update kubeconfig"));
            lines.push(key_line("9", "open cluster dashboard"));
        }
        _ => {}
    }
    lines.push(Line::from(""));
    lines.push(section_line("Commands"));
    for (name, description) in [
        (":q :quit", "quit"),
        (":r :refresh", "refresh"),
        (":cf", "clear search filter"),
        (":sa :da", "select / deselect all instances"),
        (":ec2 :s3 :eks", "switch service"),
        (":account", "pick another SSO account"),
        (":region [name]", "switch region"),
    ] {
        lines.push(key_line(name, description));
    }
    lines
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    if let Some(prompt) = app.pending_confirmation_prompt() {
        let mut spans = Vec::new();
        push_powerline_segment(&mut spans, " 󰀦 confirm ", Color::Black, WARN, PL_B);
        push_powerline_segment(
            &mut spans,
            format!(" {}? (y/n) ", compact_text(prompt, area.width.saturating_sub(24) as usize)),
            Color::White,
            PL_B,
            BG,
        );
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
            area,
        );
        return;
    }

    if let Some(prompt) = app.prompt() {
        let mut spans = Vec::new();
        push_powerline_segment(&mut spans, " 󰏫 input ", Color::Black, WARN, PL_B);
        push_powerline_segment(
            &mut spans,
            format!(" {}: {} ", prompt.label(), prompt.buffer()),
            Color::White,
            PL_B,
            BG,
        );
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
            area,
        );
        return;
    }

    let (label, text, label_bg) = match app.mode() {
        InputMode::Normal => {
            let status = if let Some(error) = app.last_error()
                && app.status().is_empty()
            {
                error.to_string()
            } else {
                app.status().to_string()
            };
            let icon = footer_status_icon(&status);
            (
                " 󰘳 nrm ",
                format!(
                    " {icon} {} ",
                    compact_text(&status, area.width.saturating_sub(14).max(24) as usize)
                ),
                PL_A,
            )
        }
        InputMode::Search => {
            let search = app.search();
            let counter = if search.query().is_empty() {
                String::new()
            } else {
                format!("  [{} matches]", search.matches().len())
            };
            (" 󰈲 srch ", format!(" /{}{} ", search.query(), counter), WARN)
        }
        InputMode::Command => (" 󰘳 cmd ", format!(" :{} ", app.command_input()), ACCENT),
    };
    let label_fg = if matches!(app.mode(), InputMode::Normal) {
        Color::White
    } else {
        Color::Black
    };

    let mut spans = Vec::new();
    push_powerline_segment(&mut spans, label, label_fg, label_bg, PL_B);
    push_powerline_segment(&mut spans, text, Color::White, PL_B, BG);

    if matches!(app.mode(), InputMode::Command) && !app.hints().is_empty() {
        let available_width = area.width as usize;
        let mut used_width = spans_width(&spans) + 1;
        spans.push(Span::raw(" "));
        for (index, hint) in app.hints().iter().enumerate() {
            let chunk = format!("{hint} ");
            let chunk_width = chunk.chars().count();
            if used_width.saturating_add(chunk_width + 1) > available_width {
                if index < app.hints().len().saturating_sub(1) {
                    spans.push(Span::styled("…", Style::default().fg(MUTED)));
                }
                break;
            }
            spans.push(Span::styled(chunk, Style::default().fg(MUTED)));
            used_width = used_width.saturating_add(chunk_width);
        }
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans))
            .style(Style::default().bg(BG))
            .alignment(Alignment::Left),
        area,
    );
}

fn render_info_modal(frame: &mut Frame, app: &App) {
    let Some(info) = app.info() else {
        return;
    };
    let area = centered_rect(72, 40, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = info
        .body
        .lines()
        .map(|line| Line::from(line.to_string()))
        .collect::<Vec<_>>();
    lines.push(Line::from(""));
    lines.push(muted_line("Esc to close"));

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title(info.title.clone())
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));
    frame.render_widget(modal, area);
}

fn section_line(title: &str) -> Line<'static> {
    Line::from(Span::styled(
        title.to_string(),
        Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
    ))
}

fn field_line(key: &str, value: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("  {key:<14}"), Style::default().fg(MUTED)),
        Span::styled(dash_if_empty(value), Style::default().fg(Color::White)),
    ])
}

fn key_line(keys: &str, description: &str) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("  {keys:<16}"),
            Style::default().fg(WARN).add_modifier(Modifier::BOLD),
        ),
        Span::raw(description.to_string()),
    ])
}

fn muted_line(text: &str) -> Line<'static> {
    Line::from(Span::styled(text.to_string(), Style::default().fg(MUTED)))
}

fn error_line(text: &str) -> Line<'static> {
    Line::from(Span::styled(
        format!("󰅚 {text}"),
        Style::default().fg(ERROR).add_modifier(Modifier::BOLD),
    ))
}

fn selection_marker(selected: bool) -> String {
    if selected { "●" } else { " " }.to_string()
}

fn dash_if_empty(value: &str) -> String {
    if value.trim().is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

fn format_time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|value| value.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn footer_status_icon(status_text: &str) -> &'static str {
    let status = status_text.to_ascii_lowercase();
    let has_failure = [
        "failed",
        "error",
        "timed out",
        "expired",
        "denied",
        "not found",
    ]
    .iter()
    .any(|needle| status.contains(needle));
    if has_failure { "󰅚" } else { "󰄬" }
}

fn help_mode_label(mode: InputMode) -> &'static str {
    match mode {
        InputMode::Normal => "normal",
        InputMode::Search => "search",
        InputMode::Command => "command",
    }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn push_powerline_segment_rtl(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn column_constraints(headers: &[&str]) -> Vec<Constraint> {
    if headers.is_empty() {
        return vec![Constraint::Percentage(100)];
    }

    headers
        .iter()
        .map(|header| {
            if header.is_empty() {
                Constraint::Length(1)
            } else {
                Constraint::Fill(1)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{compact_text, list_rows, render};
    use crate::app::App;
    use crate::config::AppConfig;
    use crate::model::CloudContext;
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;

    fn screen_text(app: &mut App, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).expect("terminal");
        terminal.draw(|frame| render(frame, app)).expect("draw");
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn list_rows_subtracts_chrome() {
        assert_eq!(list_rows(30), 25);
        assert_eq!(list_rows(3), 1);
    }

    #[test]
    fn compact_text_truncates_with_ellipsis() {
        assert_eq!(compact_text("us-east-1", 20), "us-east-1");
        assert_eq!(compact_text("eu-central-1", 5), "eu-c…");
    }

    #[test]
    fn auth_screen_lists_methods() {
        let mut app = App::new(AppConfig::default(), CloudContext::new("eu-west-1"), None);
        let _ = app.bootstrap();
        let text = screen_text(&mut app, 100, 20);
        assert!(text.contains("Authentication (3)"));
        assert!(text.contains("Named profile"));
        assert!(text.contains("eu-west-1"));
    }
}
